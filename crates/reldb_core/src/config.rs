//! Relational layer configuration.

/// Configuration shared by relation registries and manipulators.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backfill new secondary keys and drop removed ones on a version bump.
    pub backfill_secondary_keys: bool,

    /// Treat a missing secondary index entry as corruption.
    ///
    /// When disabled the inconsistency is logged and the write proceeds,
    /// which is what repair tooling needs.
    pub strict_index_consistency: bool,

    /// Release content owned by overwritten or removed rows.
    pub free_content: bool,

    /// Largest accepted encoded key, in bytes.
    pub max_key_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backfill_secondary_keys: true,
            strict_index_consistency: true,
            free_content: true,
            max_key_len: 64 * 1024, // 64 KiB
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether secondary keys are backfilled on a version bump.
    #[must_use]
    pub const fn backfill_secondary_keys(mut self, value: bool) -> Self {
        self.backfill_secondary_keys = value;
        self
    }

    /// Sets whether missing index entries are fatal.
    #[must_use]
    pub const fn strict_index_consistency(mut self, value: bool) -> Self {
        self.strict_index_consistency = value;
        self
    }

    /// Sets whether orphaned content is released.
    #[must_use]
    pub const fn free_content(mut self, value: bool) -> Self {
        self.free_content = value;
        self
    }

    /// Sets the largest accepted key length.
    #[must_use]
    pub const fn max_key_len(mut self, len: usize) -> Self {
        self.max_key_len = len;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.backfill_secondary_keys);
        assert!(config.strict_index_consistency);
        assert!(config.free_content);
        assert_eq!(config.max_key_len, 65536);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .strict_index_consistency(false)
            .free_content(false)
            .max_key_len(128);

        assert!(!config.strict_index_consistency);
        assert!(!config.free_content);
        assert!(config.backfill_secondary_keys);
        assert_eq!(config.max_key_len, 128);
    }
}
