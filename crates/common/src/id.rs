//! ID generation utilities.

use ulid::Ulid;

/// ID generator for polls, options and vote records.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new ULID-based ID.
    ///
    /// ULIDs sort by creation time, which keeps option and vote ids
    /// roughly in insertion order when listed by primary key.
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Generate `n` distinct IDs.
    #[must_use]
    pub fn generate_many(&self, n: usize) -> Vec<String> {
        let mut generator = ulid::Generator::new();
        (0..n)
            .map(|_| {
                generator
                    .generate()
                    .map_or_else(|_| self.generate(), |id| id.to_string().to_lowercase())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ulid() {
        let id_gen = IdGenerator::new();
        let id1 = id_gen.generate();
        let id2 = id_gen.generate();

        assert_eq!(id1.len(), 26);
        assert_eq!(id2.len(), 26);
        assert_ne!(id1, id2);
        assert_eq!(id1, id1.to_lowercase());
    }

    #[test]
    fn test_generate_many_is_monotonic() {
        let ids = IdGenerator::new().generate_many(5);

        assert_eq!(ids.len(), 5);
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
