use std::{collections::HashMap, hash::Hash};

use serde::{Deserialize, Serialize};

/// A keyed map where every entry is due at some time `T`.
///
/// Inserting under an existing key replaces both the value and its due time,
/// so there is at most one entry per key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingMap<K: Hash + Eq, V, T> {
    items: HashMap<K, V>,
    timetable: HashMap<K, T>,
}

impl<K, V, T> TimingMap<K, V, T>
where
    K: Hash + Eq,
    T: Ord,
{
    pub fn is_scheduled(&self, key: &K) -> bool {
        self.timetable.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.timetable.remove(key);
        self.items.remove(key)
    }

    pub fn refresh_and_insert(&mut self, key: K, value: V, time: T) -> Option<V>
    where
        K: Clone,
    {
        self.timetable.insert(key.clone(), time);
        self.items.insert(key, value)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.items.get(key)
    }

    /// Remove and return every entry due at or before `time`, earliest first.
    pub fn drain_expired(&mut self, time: &T) -> Vec<(K, V, T)> {
        let (drained, remaining) = self.timetable.drain().partition(|(_, t)| t <= time);
        self.timetable = remaining;

        let mut expired: Vec<(K, V, T)> = drained
            .into_iter()
            .filter_map(|(key, due)| {
                let value = self.items.remove(&key)?;
                Some((key, value, due))
            })
            .collect();
        expired.sort_by(|(_, _, a), (_, _, b)| a.cmp(b));
        expired
    }

    /// The earliest due time, if anything is scheduled.
    pub fn next_expiry(&self) -> Option<&T> {
        self.timetable.values().min()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V, &T)> {
        self.items
            .iter()
            .filter_map(|(key, value)| Some((key, value, self.timetable.get(key)?)))
    }
}

impl<K, V, T> Default for TimingMap<K, V, T>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self {
            items: HashMap::default(),
            timetable: HashMap::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;

    macro_rules! collect {
        ($iter:expr) => {{
            $iter
                .into_iter()
                .map(|(k, v, _)| (k, v))
                .sorted_by(|(a_key, _), (b_key, _)| ::std::cmp::Ord::cmp(a_key, b_key))
                .collect_vec()
        }};
    }

    #[test]
    fn insert_and_expiration() {
        let mut map: TimingMap<char, &'static str, i32> = TimingMap::default();
        map.refresh_and_insert('A', "Data Structures", 1);
        map.refresh_and_insert('B', "Linear Algebra", 1);
        map.refresh_and_insert('C', "Operating Systems", 3);

        let expired_items = collect! { map.drain_expired(&1) };
        assert_eq!(
            expired_items,
            vec![('A', "Data Structures"), ('B', "Linear Algebra")]
        );

        let expired_items = collect! { map.drain_expired(&2) };
        assert_eq!(expired_items, vec![], "no items should be expired yet");

        let expired_items = collect! { map.drain_expired(&3) };
        assert_eq!(
            expired_items,
            vec![('C', "Operating Systems")],
            "final remaining item should be expired"
        );
        assert!(map.is_empty(), "expired items are removed");
    }

    #[test]
    fn removed_item_should_not_show_up() {
        let mut map: TimingMap<char, &'static str, i32> = TimingMap::default();
        map.refresh_and_insert('A', "Data Structures", 1);

        assert_eq!(map.remove(&'A'), Some("Data Structures"));
        assert!(!map.is_scheduled(&'A'));

        let expired_items = collect! { map.drain_expired(&2) };
        assert_eq!(expired_items, vec![]);
    }

    #[test]
    fn reinsert_replaces_value_and_time() {
        let mut map: TimingMap<char, &'static str, i32> = TimingMap::default();
        map.refresh_and_insert('A', "first", 1);
        let previous = map.refresh_and_insert('A', "second", 5);

        assert_eq!(previous, Some("first"));
        assert_eq!(map.len(), 1);
        assert_eq!(map.next_expiry(), Some(&5));
        assert_eq!(collect! { map.drain_expired(&4) }, vec![]);
        assert_eq!(collect! { map.drain_expired(&5) }, vec![('A', "second")]);
    }

    #[test]
    fn expired_items_come_out_earliest_first() {
        let mut map: TimingMap<char, (), i32> = TimingMap::default();
        map.refresh_and_insert('A', (), 3);
        map.refresh_and_insert('B', (), 1);
        map.refresh_and_insert('C', (), 2);

        let order: Vec<char> = map.drain_expired(&3).into_iter().map(|(k, _, _)| k).collect();
        assert_eq!(order, vec!['B', 'C', 'A']);
    }
}
