// =============================================================================
// Upstream binary feed protocol (spec §6.1)
// =============================================================================
//
// Tag-byte framed messages over the WebSocket connection opened by
// `feed::client`. Grounded on the teacher's `parse_agg_trade` JSON decode in
// `market_data/trade_stream.rs`, but the upstream here is a binary tick feed
// rather than Binance's JSON aggTrade stream, so decoding works off raw bytes
// instead of `serde_json::Value`.
// =============================================================================

use anyhow::{anyhow, Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use std::io::{Cursor, Write};

use crate::repository::Trade;
use crate::types::{Action, Board};

const TAG_TRADE: u8 = 0x01;
const TAG_HEARTBEAT: u8 = 0x02;
const TAG_REJECT: u8 = 0x03;
const TAG_SUBSCRIBE: u8 = 0x10;

#[derive(Debug, Clone)]
pub enum Frame {
    Trade(Trade),
    Heartbeat,
    Reject(String),
}

/// Decode one frame from the upstream feed's binary wire format:
/// `tag:u8 | ...tag-specific fields...`.
///
/// Trade frame layout (tag `0x01`):
/// `symbol_len:u8 | symbol:[u8] | price:f64be | volume_lots:f64be |
///  action:u8 (0=Buy,1=Sell) | board:u8 (0=RG,1=other) | seq:u64be |
///  epoch_millis:i64be`.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    let mut cursor = Cursor::new(bytes);
    let tag = cursor.read_u8().context("missing frame tag byte")?;

    match tag {
        TAG_TRADE => {
            let symbol_len = cursor.read_u8().context("missing symbol length")? as usize;
            let mut symbol_buf = vec![0u8; symbol_len];
            std::io::Read::read_exact(&mut cursor, &mut symbol_buf)
                .context("truncated symbol field")?;
            let symbol =
                String::from_utf8(symbol_buf).context("symbol field is not valid utf-8")?;

            let price = cursor.read_f64::<BigEndian>().context("missing price")?;
            let volume_lots = cursor
                .read_f64::<BigEndian>()
                .context("missing volume_lots")?;
            let action_byte = cursor.read_u8().context("missing action byte")?;
            let action = match action_byte {
                0 => Action::Buy,
                1 => Action::Sell,
                other => return Err(anyhow!("unknown action byte {other}")),
            };
            let board_byte = cursor.read_u8().context("missing board byte")?;
            let board = match board_byte {
                0 => Board::Rg,
                _ => Board::Other("UNKNOWN".to_string()),
            };
            let seq = cursor.read_u64::<BigEndian>().context("missing seq")?;
            let epoch_millis = cursor
                .read_i64::<BigEndian>()
                .context("missing timestamp")?;
            let detected_at: DateTime<Utc> = Utc
                .timestamp_millis_opt(epoch_millis)
                .single()
                .ok_or_else(|| anyhow!("invalid timestamp {epoch_millis}"))?;

            Ok(Frame::Trade(Trade {
                id: 0,
                detected_at,
                symbol,
                price,
                volume_lots,
                total_value: price * volume_lots * 100.0,
                action,
                board,
                seq,
            }))
        }
        TAG_HEARTBEAT => Ok(Frame::Heartbeat),
        TAG_REJECT => {
            let mut message = String::new();
            std::io::Read::read_to_string(&mut cursor, &mut message)
                .context("malformed reject message")?;
            Ok(Frame::Reject(message))
        }
        other => Err(anyhow!("unknown frame tag {other}")),
    }
}

/// Encode a subscribe request: `tag:0x10 | count:u8 | (len:u8 | symbol)*`.
pub fn encode_subscribe(symbols: &[String]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(2 + symbols.len() * 8);
    buf.write_u8(TAG_SUBSCRIBE)?;
    buf.write_u8(symbols.len() as u8)?;
    for symbol in symbols {
        buf.write_u8(symbol.len() as u8)?;
        buf.write_all(symbol.as_bytes())?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_trade_frame(symbol: &str, price: f64, volume_lots: f64, seq: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u8(TAG_TRADE).unwrap();
        buf.write_u8(symbol.len() as u8).unwrap();
        buf.write_all(symbol.as_bytes()).unwrap();
        buf.write_f64::<BigEndian>(price).unwrap();
        buf.write_f64::<BigEndian>(volume_lots).unwrap();
        buf.write_u8(0).unwrap(); // Buy
        buf.write_u8(0).unwrap(); // RG
        buf.write_u64::<BigEndian>(seq).unwrap();
        buf.write_i64::<BigEndian>(Utc::now().timestamp_millis()).unwrap();
        buf
    }

    #[test]
    fn decodes_trade_frame_roundtrip() {
        let bytes = encode_trade_frame("BBCA", 10000.0, 50.0, 7);
        let frame = decode_frame(&bytes).unwrap();
        match frame {
            Frame::Trade(trade) => {
                assert_eq!(trade.symbol, "BBCA");
                assert_eq!(trade.seq, 7);
                assert!((trade.price - 10000.0).abs() < f64::EPSILON);
                assert_eq!(trade.action, Action::Buy);
            }
            _ => panic!("expected Trade frame"),
        }
    }

    #[test]
    fn decodes_heartbeat_frame() {
        let bytes = vec![TAG_HEARTBEAT];
        assert!(matches!(decode_frame(&bytes).unwrap(), Frame::Heartbeat));
    }

    #[test]
    fn decodes_reject_frame_with_message() {
        let mut bytes = vec![TAG_REJECT];
        bytes.extend_from_slice(b"bad token");
        match decode_frame(&bytes).unwrap() {
            Frame::Reject(msg) => assert_eq!(msg, "bad token"),
            _ => panic!("expected Reject frame"),
        }
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let bytes = vec![0xFF];
        assert!(decode_frame(&bytes).is_err());
    }

    #[test]
    fn encode_subscribe_includes_every_symbol() {
        let symbols = vec!["BBCA".to_string(), "TLKM".to_string()];
        let encoded = encode_subscribe(&symbols).unwrap();
        assert_eq!(encoded[0], TAG_SUBSCRIBE);
        assert_eq!(encoded[1], 2);
    }
}
