use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;

const CODE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Random lowercase base-36 code
pub fn generate_code(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

pub struct ShortUrlStore {
    /// code -> original URL
    urls: DashMap<String, String>,
    code_length: usize,
}

impl ShortUrlStore {
    pub fn new(code_length: usize) -> Self {
        Self {
            urls: DashMap::new(),
            code_length: code_length.max(1),
        }
    }

    /// Store `url` under a fresh code and return the code
    pub fn shorten(&self, url: &str) -> String {
        loop {
            let code = generate_code(self.code_length);
            if let Entry::Vacant(entry) = self.urls.entry(code.clone()) {
                entry.insert(url.to_string());
                tracing::debug!(code = %code, "Short code created");
                return code;
            }
        }
    }

    pub fn resolve(&self, code: &str) -> Option<String> {
        self.urls.get(code).map(|url| url.clone())
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

impl Default for ShortUrlStore {
    fn default() -> Self {
        Self::new(8)
    }
}
