//! Source key to target key table

use std::collections::BTreeMap;

use keypad_mapper_config::KeyMapping;

use crate::error::EngineError;
use crate::key::KeyCode;

/// The authoritative `source -> target` associations.
///
/// Sources are unique. Several sources may share a target; the reassignment
/// controller keeps bindings one-to-one going forward, but direct `set` calls
/// can still create many-to-one entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingTable {
    entries: BTreeMap<KeyCode, KeyCode>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from an initial snapshot, validating every pair.
    pub fn from_pairs(
        pairs: impl IntoIterator<Item = (KeyCode, KeyCode)>,
    ) -> Result<Self, EngineError> {
        let mut table = Self::new();
        for (source, target) in pairs {
            table.set(source, target)?;
        }
        Ok(table)
    }

    /// Build a table from configuration entries (key names).
    pub fn from_config(mapping: &[KeyMapping]) -> Result<Self, EngineError> {
        let pairs = mapping
            .iter()
            .map(|m| Ok((KeyCode::parse(&m.source)?, KeyCode::parse(&m.target)?)))
            .collect::<Result<Vec<_>, EngineError>>()?;
        Self::from_pairs(pairs)
    }

    /// The built-in phone keypad layout
    pub fn with_defaults() -> Self {
        let mapping = keypad_mapper_config::default_mapping();
        // The built-in names are covered by the key name tests
        Self::from_config(&mapping).unwrap_or_default()
    }

    /// Insert or overwrite the entry for `source`, returning the replaced target.
    pub fn set(&mut self, source: KeyCode, target: KeyCode) -> Result<Option<KeyCode>, EngineError> {
        source.validate()?;
        target.validate()?;
        Ok(self.entries.insert(source, target))
    }

    /// Remove the entry for `source` if present, returning its target.
    pub fn unset(&mut self, source: KeyCode) -> Result<Option<KeyCode>, EngineError> {
        source.validate()?;
        Ok(self.entries.remove(&source))
    }

    /// Replace the whole table. Nothing changes if any pair is malformed.
    pub fn replace(
        &mut self,
        pairs: impl IntoIterator<Item = (KeyCode, KeyCode)>,
    ) -> Result<(), EngineError> {
        *self = Self::from_pairs(pairs)?;
        Ok(())
    }

    /// An owned copy of the current associations.
    pub fn snapshot(&self) -> BTreeMap<KeyCode, KeyCode> {
        self.entries.clone()
    }

    pub fn target_for(&self, source: KeyCode) -> Option<KeyCode> {
        self.entries.get(&source).copied()
    }

    /// Some source currently mapped to `target`.
    ///
    /// When several sources share the target, which one is returned is not
    /// part of the contract; use [`MappingTable::sources_for`] to see them all.
    pub fn first_source_for(&self, target: KeyCode) -> Option<KeyCode> {
        self.entries
            .iter()
            .find(|(_, t)| **t == target)
            .map(|(s, _)| *s)
    }

    /// Every source currently mapped to `target`
    pub fn sources_for(&self, target: KeyCode) -> Vec<KeyCode> {
        self.entries
            .iter()
            .filter(|(_, t)| **t == target)
            .map(|(s, _)| *s)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyCode, KeyCode)> + '_ {
        self.entries.iter().map(|(s, t)| (*s, *t))
    }

    /// Entries as configuration pairs, for persistence.
    pub fn to_config(&self) -> Vec<KeyMapping> {
        self.iter()
            .map(|(source, target)| KeyMapping::new(source.name(), target.name()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use evdev::Key;

    use super::*;

    fn k(key: Key) -> KeyCode {
        KeyCode::from(key)
    }

    #[test]
    fn test_set_and_lookup() {
        let mut table = MappingTable::new();
        assert_eq!(table.set(k(Key::KEY_Q), k(Key::KEY_KP1)), Ok(None));
        assert_eq!(table.target_for(k(Key::KEY_Q)), Some(k(Key::KEY_KP1)));
        assert_eq!(table.target_for(k(Key::KEY_W)), None);
    }

    #[test]
    fn test_set_overwrites_silently() {
        let mut table = MappingTable::new();
        table.set(k(Key::KEY_Q), k(Key::KEY_KP1)).unwrap();
        let previous = table.set(k(Key::KEY_Q), k(Key::KEY_KP2)).unwrap();

        assert_eq!(previous, Some(k(Key::KEY_KP1)));
        assert_eq!(table.target_for(k(Key::KEY_Q)), Some(k(Key::KEY_KP2)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_unset_absent_is_noop() {
        let mut table = MappingTable::new();
        table.set(k(Key::KEY_Q), k(Key::KEY_KP1)).unwrap();

        assert_eq!(table.unset(k(Key::KEY_W)), Ok(None));
        assert_eq!(table.unset(k(Key::KEY_Q)), Ok(Some(k(Key::KEY_KP1))));
        assert!(table.is_empty());
    }

    #[test]
    fn test_invalid_identities_rejected_without_change() {
        let mut table = MappingTable::new();
        table.set(k(Key::KEY_Q), k(Key::KEY_KP1)).unwrap();
        let before = table.clone();

        assert_eq!(
            table.set(KeyCode::new(0), k(Key::KEY_KP2)),
            Err(EngineError::InvalidKey(0))
        );
        assert_eq!(
            table.set(k(Key::KEY_Q), KeyCode::new(0x300)),
            Err(EngineError::InvalidKey(0x300))
        );
        assert_eq!(table.unset(KeyCode::new(0)), Err(EngineError::InvalidKey(0)));
        assert_eq!(table, before);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut table = MappingTable::new();
        table.set(k(Key::KEY_Q), k(Key::KEY_KP1)).unwrap();

        let mut snapshot = table.snapshot();
        snapshot.insert(k(Key::KEY_W), k(Key::KEY_KP2));
        snapshot.remove(&k(Key::KEY_Q));

        assert_eq!(table.target_for(k(Key::KEY_Q)), Some(k(Key::KEY_KP1)));
        assert_eq!(table.target_for(k(Key::KEY_W)), None);
    }

    #[test]
    fn test_first_source_for() {
        let mut table = MappingTable::new();
        table.set(k(Key::KEY_Q), k(Key::KEY_KP1)).unwrap();
        table.set(k(Key::KEY_W), k(Key::KEY_KP2)).unwrap();

        assert_eq!(table.first_source_for(k(Key::KEY_KP2)), Some(k(Key::KEY_W)));
        assert_eq!(table.first_source_for(k(Key::KEY_KP3)), None);
    }

    #[test]
    fn test_first_source_for_many_to_one_is_ambiguous() {
        // Which source comes back is unspecified; only membership is checked.
        let mut table = MappingTable::new();
        table.set(k(Key::KEY_Q), k(Key::KEY_KP1)).unwrap();
        table.set(k(Key::KEY_A), k(Key::KEY_KP1)).unwrap();

        let sources = table.sources_for(k(Key::KEY_KP1));
        assert_eq!(sources.len(), 2);
        let first = table.first_source_for(k(Key::KEY_KP1)).unwrap();
        assert!(sources.contains(&first));
    }

    #[test]
    fn test_replace_is_all_or_nothing() {
        let mut table = MappingTable::new();
        table.set(k(Key::KEY_Q), k(Key::KEY_KP1)).unwrap();

        let bad = vec![
            (k(Key::KEY_W), k(Key::KEY_KP2)),
            (KeyCode::new(0), k(Key::KEY_KP3)),
        ];
        assert!(table.replace(bad).is_err());
        assert_eq!(table.len(), 1);

        table
            .replace(vec![(k(Key::KEY_W), k(Key::KEY_KP2))])
            .unwrap();
        assert_eq!(table.target_for(k(Key::KEY_Q)), None);
        assert_eq!(table.target_for(k(Key::KEY_W)), Some(k(Key::KEY_KP2)));
    }

    #[test]
    fn test_defaults_cover_the_keypad() {
        let table = MappingTable::with_defaults();
        assert_eq!(table.len(), 12);
        assert_eq!(table.target_for(k(Key::KEY_Q)), Some(k(Key::KEY_KP1)));
        assert_eq!(table.target_for(k(Key::KEY_SPACE)), Some(k(Key::KEY_KP0)));
        assert_eq!(table.target_for(k(Key::KEY_V)), Some(k(Key::KEY_KPASTERISK)));
        assert_eq!(table.target_for(k(Key::KEY_B)), Some(k(Key::KEY_KPPLUS)));
    }

    #[test]
    fn test_from_config_unknown_name() {
        let mapping = vec![KeyMapping::new("Q", "Hyper")];
        assert_eq!(
            MappingTable::from_config(&mapping),
            Err(EngineError::UnknownKeyName("Hyper".to_string()))
        );
    }

    #[test]
    fn test_to_config_uses_canonical_names() {
        let mut table = MappingTable::new();
        table.set(k(Key::KEY_SPACE), k(Key::KEY_KP0)).unwrap();
        assert_eq!(table.to_config(), vec![KeyMapping::new("SPACE", "KP0")]);
    }
}
