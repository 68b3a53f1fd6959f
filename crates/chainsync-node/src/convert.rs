//! Conversion from node JSON into the core block and transaction types.
//!
//! Amounts arrive as decimal coin values (`0.00012345`). They are converted
//! to satoshis from their decimal text so no floating-point rounding is
//! involved.

use serde_json::Value;

use chainsync_core::types::{Block, TxInfo, TxInput, TxOutput, GENESIS_PREV};

use crate::error::RpcError;

const SAT_DECIMALS: i32 = 8;

/// Build a [`Block`] from a verbose `getblock` result.
pub fn block_from_json(value: &Value) -> Result<Block, RpcError> {
    let hash = str_field(value, "hash")
        .ok_or_else(|| RpcError::Other("block without hash".into()))?;
    let previous_hash = str_field(value, "previousblockhash").unwrap_or(GENESIS_PREV);

    let tx = value
        .get("tx")
        .and_then(Value::as_array)
        .map(|txs| {
            txs.iter()
                .filter_map(|t| match t {
                    Value::String(id) => Some(id.clone()),
                    // verbosity 2 embeds full transactions
                    other => str_field(other, "txid").map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Block {
        hash: hash.to_string(),
        previous_hash: previous_hash.to_string(),
        tx,
        time: value.get("time").and_then(Value::as_i64).unwrap_or(0),
    })
}

/// Build a [`TxInfo`] from a verbose `getrawtransaction` result.
pub fn tx_from_json(value: &Value) -> Result<TxInfo, RpcError> {
    let txid = str_field(value, "txid")
        .ok_or_else(|| RpcError::Other("transaction without txid".into()))?;

    let vin = array_field(value, "vin").iter().map(input_from_json).collect();

    let vout = array_field(value, "vout")
        .iter()
        .enumerate()
        .map(|(i, out)| output_from_json(i, out))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TxInfo {
        txid: txid.to_string(),
        vin,
        vout,
        blockhash: str_field(value, "blockhash").map(str::to_string),
        confirmations: value.get("confirmations").and_then(Value::as_u64),
        time: value
            .get("time")
            .or_else(|| value.get("blocktime"))
            .and_then(Value::as_i64)
            .unwrap_or(0),
    })
}

fn input_from_json(value: &Value) -> TxInput {
    if value.get("coinbase").is_some() {
        return TxInput::default();
    }
    let prevout = value.get("prevout");
    TxInput {
        txid: str_field(value, "txid").map(str::to_string),
        vout: value
            .get("vout")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok()),
        addr: str_field(value, "addr")
            .map(str::to_string)
            .or_else(|| prevout.and_then(|p| script_addresses(p).into_iter().next())),
        value_sat: value
            .get("valueSat")
            .and_then(Value::as_u64)
            .or_else(|| prevout.and_then(|p| p.get("value")).and_then(parse_amount_sat)),
    }
}

fn output_from_json(position: usize, value: &Value) -> Result<TxOutput, RpcError> {
    let n = value
        .get("n")
        .and_then(Value::as_u64)
        .unwrap_or(position as u64);
    let value_sat = value
        .get("value")
        .and_then(parse_amount_sat)
        .ok_or_else(|| RpcError::Other(format!("output {n} has no valid value")))?;

    Ok(TxOutput {
        n: u32::try_from(n).map_err(|_| RpcError::Other(format!("output index {n} out of range")))?,
        value_sat,
        addresses: script_addresses(value),
    })
}

/// Destination addresses of an output's `scriptPubKey`, in either the
/// legacy `addresses` list or the newer single `address` form.
fn script_addresses(output: &Value) -> Vec<String> {
    let Some(script) = output.get("scriptPubKey") else {
        return vec![];
    };
    if let Some(list) = script.get("addresses").and_then(Value::as_array) {
        return list
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }
    str_field(script, "address")
        .map(|a| vec![a.to_string()])
        .unwrap_or_default()
}

/// Parse a decimal coin amount (number or string) into satoshis.
///
/// Returns `None` for negative, malformed or overflowing values. Digits
/// beyond the eighth decimal place are truncated.
pub fn parse_amount_sat(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => decimal_to_sat(&n.to_string()),
        Value::String(s) => decimal_to_sat(s),
        _ => None,
    }
}

fn decimal_to_sat(text: &str) -> Option<u64> {
    let text = text.trim();
    let (mantissa, exponent) = match text.find(|c: char| c == 'e' || c == 'E') {
        Some(i) => (&text[..i], text[i + 1..].parse::<i32>().ok()?),
        None => (text, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = format!("{int_part}{frac_part}");
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mantissa: u128 = digits.parse().ok()?;
    let scale = SAT_DECIMALS + exponent - i32::try_from(frac_part.len()).ok()?;
    let sat = if scale >= 0 {
        mantissa.checked_mul(10u128.checked_pow(scale.unsigned_abs())?)?
    } else {
        mantissa / 10u128.checked_pow(scale.unsigned_abs())?
    };
    u64::try_from(sat).ok()
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn array_field<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn amounts_are_exact() {
        assert_eq!(parse_amount_sat(&json!(0.1)), Some(10_000_000));
        assert_eq!(parse_amount_sat(&json!(0.00000001)), Some(1));
        assert_eq!(parse_amount_sat(&json!(21.0)), Some(2_100_000_000));
        assert_eq!(parse_amount_sat(&json!(50)), Some(5_000_000_000));
        assert_eq!(parse_amount_sat(&json!("1.23456789")), Some(123_456_789));
        assert_eq!(parse_amount_sat(&json!("1e-8")), Some(1));
        assert_eq!(parse_amount_sat(&json!("0.000000019")), Some(1));
    }

    #[test]
    fn bad_amounts_are_rejected() {
        assert_eq!(parse_amount_sat(&json!(-1.0)), None);
        assert_eq!(parse_amount_sat(&json!("abc")), None);
        assert_eq!(parse_amount_sat(&json!("")), None);
        assert_eq!(parse_amount_sat(&json!(null)), None);
    }

    #[test]
    fn genesis_block_gets_zero_predecessor() {
        let block = block_from_json(&json!({
            "hash": "g0",
            "tx": ["cb"],
            "time": 1231006505,
            "height": 0
        }))
        .unwrap();
        assert!(block.is_genesis());
        assert_eq!(block.tx, vec!["cb".to_string()]);
        assert_eq!(block.time, 1231006505);
    }

    #[test]
    fn block_accepts_embedded_transactions() {
        let block = block_from_json(&json!({
            "hash": "b1",
            "previousblockhash": "g0",
            "tx": [{"txid": "t1"}, {"txid": "t2"}]
        }))
        .unwrap();
        assert_eq!(block.previous_hash, "g0");
        assert_eq!(block.tx, vec!["t1".to_string(), "t2".to_string()]);
    }

    #[test]
    fn block_without_hash_is_an_error() {
        assert!(block_from_json(&json!({"tx": []})).is_err());
    }

    #[test]
    fn transaction_fields() {
        let tx = tx_from_json(&json!({
            "txid": "t2",
            "blockhash": "b2",
            "confirmations": 3,
            "time": 1700000000,
            "vin": [
                {"coinbase": "04ffff"},
                {"txid": "t1", "vout": 0,
                 "prevout": {"value": 0.5, "scriptPubKey": {"address": "alice"}}}
            ],
            "vout": [
                {"value": 0.3, "n": 0, "scriptPubKey": {"addresses": ["bob"]}},
                {"value": 0.19, "n": 1, "scriptPubKey": {"address": "alice"}},
                {"value": 0, "n": 2, "scriptPubKey": {"type": "nulldata"}}
            ]
        }))
        .unwrap();

        assert_eq!(tx.vin[0], TxInput::default());
        assert_eq!(tx.vin[1].txid.as_deref(), Some("t1"));
        assert_eq!(tx.vin[1].addr.as_deref(), Some("alice"));
        assert_eq!(tx.vin[1].value_sat, Some(50_000_000));
        assert_eq!(tx.vout[0].value_sat, 30_000_000);
        assert_eq!(tx.vout[1].addresses, vec!["alice".to_string()]);
        assert!(tx.vout[2].addresses.is_empty());
        assert_eq!(tx.blockhash.as_deref(), Some("b2"));
        assert_eq!(tx.confirmations, Some(3));
        assert_eq!(
            tx.addresses().into_iter().collect::<Vec<_>>(),
            vec!["alice".to_string(), "bob".to_string()]
        );
    }

    #[test]
    fn mempool_transaction_has_no_block() {
        let tx = tx_from_json(&json!({
            "txid": "t9",
            "vin": [],
            "vout": [{"value": 1.0, "n": 0, "scriptPubKey": {"address": "carol"}}]
        }))
        .unwrap();
        assert!(tx.blockhash.is_none());
        assert!(tx.confirmations.is_none());
    }
}
