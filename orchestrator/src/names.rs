use uuid::Uuid;

/// Object names are DNS labels of at most 63 characters.
const MAX_NAME_LENGTH: usize = 63;
const RANDOM_LENGTH: usize = 5;
const MAX_BASE_LENGTH: usize = MAX_NAME_LENGTH - RANDOM_LENGTH;

/// No vowels and no easily confused characters, so generated suffixes never
/// spell words.
const ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

/// Hands out a fresh `<prefix>-xxxxx` name for every workload so objects of
/// one run never collide with leftovers of another.
#[derive(Debug, Clone)]
pub struct NameGenerator {
    prefix: String,
}

impl NameGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn next_name(&self) -> String {
        generate(&format!("{}-", self.prefix))
    }
}

/// `base`, cut to leave room for the suffix, followed by five random
/// characters.
pub fn generate(base: &str) -> String {
    let mut name = base.chars().take(MAX_BASE_LENGTH).collect::<String>();
    let random = Uuid::new_v4();
    name.extend(
        random
            .as_bytes()
            .iter()
            .take(RANDOM_LENGTH)
            .map(|byte| ALPHABET[*byte as usize % ALPHABET.len()] as char),
    );
    name
}
