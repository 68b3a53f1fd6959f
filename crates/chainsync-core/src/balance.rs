//! Per-address balance aggregation.
//!
//! An aggregate is always recomputed from the address's full item history,
//! never patched incrementally, so it self-heals after a reorg changes which
//! items are confirmed.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::TxItem;

/// Balance and appearance summary for one address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressAggregate {
    pub address: String,
    pub balance_sat: u64,
    pub total_received_sat: u64,
    pub total_sent_sat: u64,
    /// Pending delta; negative when confirmed funds are being spent by
    /// unconfirmed transactions.
    pub unconfirmed_balance_sat: i64,
    pub tx_appearances: u64,
    pub unconfirmed_tx_appearances: u64,
}

impl AddressAggregate {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Confirmed balance in display units. `coin` is satoshis per unit.
    pub fn balance(&self, coin: u64) -> f64 {
        self.balance_sat as f64 / coin as f64
    }
}

/// Folds [`TxItem`]s into an [`AddressAggregate`], counting each txid at
/// most once across founding and spending roles.
#[derive(Debug)]
pub struct BalanceAccumulator {
    aggregate: AddressAggregate,
    seen: HashSet<String>,
}

impl BalanceAccumulator {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            aggregate: AddressAggregate::new(address),
            seen: HashSet::new(),
        }
    }

    pub fn add_item(&mut self, item: &TxItem) {
        let agg = &mut self.aggregate;
        let value = item.value_sat;

        let founding_is_new = self.seen.insert(item.txid.clone());
        let spend_is_new = match &item.spent_tx_id {
            Some(spent) => self.seen.insert(spent.clone()),
            None => false,
        };

        if !item.is_confirmed {
            agg.unconfirmed_balance_sat += value as i64;
            agg.unconfirmed_tx_appearances += u64::from(founding_is_new);
            return;
        }

        agg.tx_appearances += u64::from(founding_is_new);
        agg.total_received_sat += value;

        match &item.spent_tx_id {
            None => agg.balance_sat += value,
            Some(_) if !item.spent_is_confirmed => {
                agg.balance_sat += value;
                agg.unconfirmed_balance_sat -= value as i64;
                agg.unconfirmed_tx_appearances += u64::from(spend_is_new);
            }
            Some(_) => {
                agg.total_sent_sat += value;
                agg.tx_appearances += u64::from(spend_is_new);
            }
        }
    }

    pub fn extend<'a, I>(&mut self, items: I)
    where
        I: IntoIterator<Item = &'a TxItem>,
    {
        for item in items {
            self.add_item(item);
        }
    }

    /// Finish the run, discarding the de-duplication set.
    pub fn finish(self) -> AddressAggregate {
        self.aggregate
    }
}

/// Aggregate a full item history for `address`.
pub fn aggregate_items(address: &str, items: &[TxItem]) -> AddressAggregate {
    let mut acc = BalanceAccumulator::new(address);
    acc.extend(items);
    acc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(txid: &str, value: u64, confirmed: bool) -> TxItem {
        TxItem {
            txid: txid.into(),
            value_sat: value,
            is_confirmed: confirmed,
            ..Default::default()
        }
    }

    fn spent(mut it: TxItem, by: &str, confirmed: bool) -> TxItem {
        it.spent_tx_id = Some(by.into());
        it.spent_is_confirmed = confirmed;
        it
    }

    #[test]
    fn confirmed_unspent_counts_toward_balance() {
        let agg = aggregate_items("a", &[item("t1", 500, true), item("t2", 250, true)]);
        assert_eq!(agg.balance_sat, 750);
        assert_eq!(agg.total_received_sat, 750);
        assert_eq!(agg.total_sent_sat, 0);
        assert_eq!(agg.tx_appearances, 2);
    }

    #[test]
    fn confirmed_spend_moves_value_to_sent() {
        let agg = aggregate_items("a", &[spent(item("t1", 500, true), "t2", true)]);
        assert_eq!(agg.balance_sat, 0);
        assert_eq!(agg.total_sent_sat, 500);
        assert_eq!(agg.tx_appearances, 2);
        assert_eq!(agg.unconfirmed_tx_appearances, 0);
    }

    #[test]
    fn unconfirmed_spend_keeps_balance_and_reduces_pending() {
        let agg = aggregate_items("a", &[spent(item("t1", 500, true), "t2", false)]);
        assert_eq!(agg.balance_sat, 500);
        assert_eq!(agg.unconfirmed_balance_sat, -500);
        assert_eq!(agg.tx_appearances, 1);
        assert_eq!(agg.unconfirmed_tx_appearances, 1);
    }

    #[test]
    fn unconfirmed_founding_only_touches_pending() {
        let agg = aggregate_items("a", &[item("t1", 70, false)]);
        assert_eq!(agg.balance_sat, 0);
        assert_eq!(agg.total_received_sat, 0);
        assert_eq!(agg.unconfirmed_balance_sat, 70);
        assert_eq!(agg.unconfirmed_tx_appearances, 1);
    }

    #[test]
    fn shared_txid_counted_once() {
        // t2 spends the output of t1 and also pays change back to the address.
        let items = [spent(item("t1", 1_000, true), "t2", true), item("t2", 400, true)];
        let agg = aggregate_items("a", &items);
        assert_eq!(agg.tx_appearances, 2);
        assert_eq!(agg.balance_sat, 400);
        assert_eq!(agg.total_received_sat, 1_400);
        assert_eq!(agg.total_sent_sat, 1_000);
    }

    #[test]
    fn confirmed_component_invariant() {
        let items = [
            item("t1", 10, true),
            spent(item("t2", 20, true), "t3", true),
            spent(item("t3", 5, true), "t4", false),
            item("t5", 99, false),
            spent(item("t6", 7, true), "t1", true),
        ];
        let agg = aggregate_items("a", &items);
        assert_eq!(agg.balance_sat, agg.total_received_sat - agg.total_sent_sat);
    }

    #[test]
    fn display_balance_divides_once() {
        let items: Vec<_> = (0..10).map(|i| item(&format!("t{i}"), 10_000_000, true)).collect();
        let agg = aggregate_items("a", &items);
        assert_eq!(agg.balance_sat, 100_000_000);
        assert_eq!(agg.balance(100_000_000), 1.0);
    }
}
