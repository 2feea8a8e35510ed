use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use kv_ring_core::{Key, RingError};

/// Reply sent to line-protocol clients
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Option<String>),
    Array(Vec<RespValue>),
}

/// Commands accepted on the client endpoint, one per line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get(Key),
    Put(Key, String),
    Del(Key),
    Peers,
    Status,
    Quit,
}

impl RespValue {
    pub fn encode(&self) -> String {
        match self {
            RespValue::SimpleString(s) => format!("+{}\r\n", s),
            RespValue::Error(e) => format!("-{}\r\n", e),
            RespValue::Integer(i) => format!(":{}\r\n", i),
            RespValue::BulkString(Some(s)) => format!("${}\r\n{}\r\n", s.len(), s),
            RespValue::BulkString(None) => "$-1\r\n".to_string(),
            RespValue::Array(arr) => {
                let mut result = format!("*{}\r\n", arr.len());
                for item in arr {
                    result.push_str(&item.encode());
                }
                result
            }
        }
    }

    pub fn ok() -> RespValue {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn from_error(error: &RingError) -> RespValue {
        match error {
            RingError::QuorumNotReached { required, received, .. } => {
                RespValue::Error(format!("QUORUM required {} received {}", required, received))
            }
            RingError::NotJoined => RespValue::Error("NOTJOINED node is not a ring member".to_string()),
            other => RespValue::Error(format!("ERR {}", other)),
        }
    }
}

impl Command {
    pub fn parse(input: &str) -> Result<Command, String> {
        let line = input.trim();
        if line.is_empty() {
            return Err("ERR empty command".to_string());
        }
        let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim_start();

        match name.to_uppercase().as_str() {
            "GET" => Ok(Command::Get(parse_key(rest)?)),
            "DEL" => Ok(Command::Del(parse_key(rest)?)),
            "PUT" => {
                let (key, value) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| "ERR usage: PUT <key> <value>".to_string())?;
                Ok(Command::Put(parse_key(key)?, value.trim_start().to_string()))
            }
            "PEERS" => Ok(Command::Peers),
            "STATUS" => Ok(Command::Status),
            "QUIT" => Ok(Command::Quit),
            other => Err(format!("ERR unknown command '{}'", other)),
        }
    }
}

fn parse_key(input: &str) -> Result<Key, String> {
    let mut parts = input.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(key), None) => key
            .parse::<Key>()
            .map_err(|_| format!("ERR key must be a non-negative integer, got '{}'", key)),
        (None, _) => Err("ERR missing key".to_string()),
        (Some(_), Some(_)) => Err("ERR too many arguments".to_string()),
    }
}

/// Decodes replies on the client side
pub struct RespCodec;

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match parse_value(src)? {
            Some((value, consumed)) => {
                src.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<RespValue> for RespCodec {
    type Error = io::Error;

    fn encode(&mut self, item: RespValue, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_slice(item.encode().as_bytes());
        Ok(())
    }
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

/// Parse one value from the front of `src`, returning it with the number of
/// bytes it spans; `None` when more data is needed
fn parse_value(src: &[u8]) -> Result<Option<(RespValue, usize)>, io::Error> {
    let Some(&first_byte) = src.first() else {
        return Ok(None);
    };
    let Some(line_end) = find_crlf(src, 1) else {
        return Ok(None);
    };
    let line = String::from_utf8_lossy(&src[1..line_end]).to_string();
    let after_line = line_end + 2;

    match first_byte {
        b'+' => Ok(Some((RespValue::SimpleString(line), after_line))),
        b'-' => Ok(Some((RespValue::Error(line), after_line))),
        b':' => {
            let value = line.parse::<i64>().map_err(|_| invalid("Invalid integer"))?;
            Ok(Some((RespValue::Integer(value), after_line)))
        }
        b'$' => {
            let len = line.parse::<i64>().map_err(|_| invalid("Invalid bulk string length"))?;
            if len < 0 {
                return Ok(Some((RespValue::BulkString(None), after_line)));
            }
            let data_end = usize::try_from(len)
                .ok()
                .and_then(|len| after_line.checked_add(len))
                .filter(|end| end.checked_add(2).is_some())
                .ok_or_else(|| invalid("Bulk string length out of range"))?;
            if src.len() < data_end + 2 {
                return Ok(None);
            }
            if &src[data_end..data_end + 2] != b"\r\n" {
                return Err(invalid("Invalid bulk string format"));
            }
            let data = String::from_utf8_lossy(&src[after_line..data_end]).to_string();
            Ok(Some((RespValue::BulkString(Some(data)), data_end + 2)))
        }
        b'*' => {
            let len = line.parse::<i64>().map_err(|_| invalid("Invalid array length"))?;
            let mut items = Vec::new();
            let mut pos = after_line;
            for _ in 0..len.max(0) {
                match parse_value(&src[pos..])? {
                    Some((item, consumed)) => {
                        items.push(item);
                        pos += consumed;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(items), pos)))
        }
        _ => Err(invalid("Unknown RESP type")),
    }
}

fn find_crlf(src: &[u8], start: usize) -> Option<usize> {
    (start..src.len().saturating_sub(1)).find(|&i| src[i] == b'\r' && src[i + 1] == b'\n')
}
