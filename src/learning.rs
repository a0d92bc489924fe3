//! Per-switch MAC learning.
//!
//! One `(switch, mac) -> ingress port` binding per observed source address,
//! last write wins, no aging. Bindings are strictly partitioned by switch: a
//! binding learned on one datapath never satisfies a lookup on another. Each
//! switch owns its own guarded map so that unrelated switches never serialize
//! on each other.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use pnet::util::MacAddr;

use crate::config::SwitchId;

type PortMap = HashMap<MacAddr, u32>;

/// The per-switch MAC-to-port learning table.
#[derive(Debug, Default)]
pub struct MacLearningTable {
    tables: RwLock<HashMap<SwitchId, Mutex<PortMap>>>,
}

impl MacLearningTable {
    /// Return an empty learning table.
    ///
    /// # Example
    /// ```
    /// use sticklb::config::SwitchId;
    /// use sticklb::learning::MacLearningTable;
    ///
    /// let table = MacLearningTable::new();
    /// assert_eq!(table.mac_count(SwitchId(1)), 0);
    /// ```
    pub fn new() -> MacLearningTable {
        MacLearningTable::default()
    }

    /// Record that `mac` was seen entering `switch` on `port`. Unconditional
    /// overwrite, no error conditions.
    ///
    /// # Example
    /// ```
    /// use pnet::util::MacAddr;
    /// use sticklb::config::SwitchId;
    /// use sticklb::learning::MacLearningTable;
    ///
    /// let table = MacLearningTable::new();
    /// let mac = MacAddr::new(0, 1, 2, 3, 4, 5);
    ///
    /// table.record(SwitchId(1), mac, 7);
    /// assert_eq!(table.lookup(SwitchId(1), mac), Some(7));
    ///
    /// // last write wins
    /// table.record(SwitchId(1), mac, 9);
    /// assert_eq!(table.lookup(SwitchId(1), mac), Some(9));
    /// ```
    pub fn record(&self, switch: SwitchId, mac: MacAddr, port: u32) {
        {
            let tables = read_guard(&self.tables);
            if let Some(table) = tables.get(&switch) {
                lock_guard(table).insert(mac, port);
                trace!("switch {}: learned {} on port {}", switch, mac, port);
                return;
            }
        }

        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let table = tables.entry(switch).or_insert_with(|| Mutex::new(PortMap::new()));
        table
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .insert(mac, port);
        trace!("switch {}: learned {} on port {}", switch, mac, port);
    }

    /// Look up the ingress port last observed for `mac` on `switch`. An absent
    /// result means the caller should flood.
    ///
    /// # Example
    /// ```
    /// use pnet::util::MacAddr;
    /// use sticklb::config::SwitchId;
    /// use sticklb::learning::MacLearningTable;
    ///
    /// let table = MacLearningTable::new();
    /// let mac = MacAddr::new(0, 1, 2, 3, 4, 5);
    /// table.record(SwitchId(1), mac, 7);
    ///
    /// // bindings are scoped per switch
    /// assert_eq!(table.lookup(SwitchId(1), mac), Some(7));
    /// assert_eq!(table.lookup(SwitchId(2), mac), None);
    /// ```
    pub fn lookup(&self, switch: SwitchId, mac: MacAddr) -> Option<u32> {
        let tables = read_guard(&self.tables);
        let table = tables.get(&switch)?;
        let port = lock_guard(table).get(&mac).copied();
        port
    }

    /// Return the count of learned bindings on one switch.
    pub fn mac_count(&self, switch: SwitchId) -> usize {
        let tables = read_guard(&self.tables);
        match tables.get(&switch) {
            Some(table) => lock_guard(table).len(),
            None => 0,
        }
    }
}

fn read_guard<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn lock_guard<T>(lock: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn learning_is_isolated_between_switches() {
        let table = MacLearningTable::new();
        let mac = MacAddr::new(0, 0xaa, 0xbb, 0xcc, 0xdd, 0xee);

        table.record(SwitchId(1), mac, 3);

        assert_eq!(table.lookup(SwitchId(1), mac), Some(3));
        assert_eq!(table.lookup(SwitchId(2), mac), None);
        assert_eq!(table.mac_count(SwitchId(1)), 1);
        assert_eq!(table.mac_count(SwitchId(2)), 0);
    }

    #[test]
    fn concurrent_records_settle_on_a_single_binding() {
        let table = Arc::new(MacLearningTable::new());
        let mac = MacAddr::new(0, 1, 2, 3, 4, 5);

        let mut handles = Vec::new();
        for port in 1..=8u32 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    table.record(SwitchId(9), mac, port);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let port = table.lookup(SwitchId(9), mac).unwrap();
        assert!((1..=8).contains(&port));
        assert_eq!(table.mac_count(SwitchId(9)), 1);
    }
}
