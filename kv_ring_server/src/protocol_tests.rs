use crate::client::render_response;
use crate::protocol::*;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn test_parse_commands() {
    assert_eq!(Command::parse("GET 15\r\n"), Ok(Command::Get(15)));
    assert_eq!(Command::parse("del 7"), Ok(Command::Del(7)));
    assert_eq!(Command::parse("PEERS"), Ok(Command::Peers));
    assert_eq!(Command::parse("status\n"), Ok(Command::Status));
    assert_eq!(Command::parse("Quit"), Ok(Command::Quit));
}

#[test]
fn test_put_value_keeps_inner_spaces() {
    assert_eq!(
        Command::parse("PUT 15   hello ring  world\r\n"),
        Ok(Command::Put(15, "hello ring  world".to_string()))
    );
}

#[test]
fn test_parse_rejects_malformed_commands() {
    assert!(Command::parse("").is_err());
    assert!(Command::parse("GET").is_err());
    assert!(Command::parse("GET abc").is_err());
    assert!(Command::parse("GET -3").is_err());
    assert!(Command::parse("GET 1 2").is_err());
    assert!(Command::parse("PUT 15").is_err());

    let unknown = Command::parse("FLUSHALL").unwrap_err();
    assert!(unknown.contains("FLUSHALL"));
}

#[test]
fn test_encode_replies() {
    assert_eq!(RespValue::ok().encode(), "+OK\r\n");
    assert_eq!(RespValue::Integer(1).encode(), ":1\r\n");
    assert_eq!(RespValue::BulkString(None).encode(), "$-1\r\n");
    assert_eq!(RespValue::BulkString(Some("ring".to_string())).encode(), "$4\r\nring\r\n");
    assert_eq!(
        RespValue::Array(vec![
            RespValue::BulkString(Some("10 a".to_string())),
            RespValue::Integer(2),
        ])
        .encode(),
        "*2\r\n$4\r\n10 a\r\n:2\r\n"
    );
}

#[test]
fn test_decode_consumes_one_reply_at_a_time() {
    let mut codec = RespCodec;
    let mut buf = BytesMut::from("+OK\r\n-ERR boom\r\n:42\r\n$-1\r\n");

    assert_eq!(codec.decode(&mut buf).unwrap(), Some(RespValue::ok()));
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(RespValue::Error("ERR boom".to_string())));
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(RespValue::Integer(42)));
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(RespValue::BulkString(None)));
    assert!(buf.is_empty());
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
}

#[test]
fn test_decode_waits_for_complete_frames() {
    let mut codec = RespCodec;
    let mut buf = BytesMut::from("$5\r\nhel");
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    assert_eq!(buf.len(), 7);

    buf.extend_from_slice(b"lo\r\n");
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(RespValue::BulkString(Some("hello".to_string())))
    );

    let mut buf = BytesMut::from("*2\r\n$4\r\n10 a\r\n");
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    buf.extend_from_slice(b"$4\r\n20 b\r\n");
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(RespValue::Array(vec![
            RespValue::BulkString(Some("10 a".to_string())),
            RespValue::BulkString(Some("20 b".to_string())),
        ]))
    );
}

#[test]
fn test_decode_rejects_garbage() {
    let mut codec = RespCodec;
    assert!(codec.decode(&mut BytesMut::from("?what\r\n")).is_err());
    assert!(codec.decode(&mut BytesMut::from(":abc\r\n")).is_err());
    assert!(codec.decode(&mut BytesMut::from("$2\r\nabcd\r\n")).is_err());
}

#[test]
fn test_decode_huge_bulk_length_does_not_panic() {
    let mut codec = RespCodec;
    let mut buf = BytesMut::from("$9223372036854775807\r\nabc");
    assert!(matches!(codec.decode(&mut buf), Ok(None) | Err(_)));
    let mut buf = BytesMut::from("$99999999999999999999\r\n");
    assert!(codec.decode(&mut buf).is_err());
}

#[test]
fn test_codec_encodes_what_it_decodes() {
    let mut codec = RespCodec;
    let mut buf = BytesMut::new();
    let reply = RespValue::Array(vec![RespValue::ok(), RespValue::BulkString(None)]);
    codec.encode(reply.clone(), &mut buf).unwrap();
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(reply));
}

#[test]
fn test_render_response() {
    assert_eq!(render_response(&RespValue::BulkString(None)), "(nil)");
    assert_eq!(render_response(&RespValue::Integer(0)), "(integer) 0");
    assert_eq!(render_response(&RespValue::Error("ERR x".to_string())), "ERROR: ERR x");
    assert_eq!(
        render_response(&RespValue::Array(vec![
            RespValue::BulkString(Some("10 a".to_string())),
            RespValue::BulkString(Some("20 b".to_string())),
        ])),
        "1) 10 a\n2) 20 b"
    );
}
