//! Кодек транспортных фреймов.
//!
//! Фрейм это `<topic> <body>`:
//! - обычный фрейм: тело это JSON-сериализованное событие;
//! - bulk-фрейм: топик `<topic>;bulk`, тело `<pub_id> <сырые байты>`.
//!
//! Bulk-фрейм распознаётся только по суффиксу `bulk` у топика; такое тело
//! никогда не разбирается как JSON. Топик не должен содержать пробельных
//! символов, кодек это не проверяет.

use bytes::{BufMut, Bytes, BytesMut};
use pubcast_error::{DecodeError, FrameError, FramingError};

use super::{BulkPayload, Event, Message, Payload};

/// Суффикс, по которому декодер узнаёт bulk-фрейм.
pub const BULK_SUFFIX: &[u8] = b"bulk";
/// Что публикатор дописывает к топику bulk-фрейма.
pub const BULK_TOPIC_SUFFIX: &str = ";bulk";

const SEPARATOR: u8 = b' ';

/// Кодирует обычный фрейм: `topic + ' ' + json(event)`.
pub fn encode_normal(
    topic: &str,
    event: &Event,
) -> Result<Bytes, DecodeError> {
    let body = event.to_json()?;

    let mut frame = BytesMut::with_capacity(topic.len() + 1 + body.len());
    frame.put_slice(topic.as_bytes());
    frame.put_u8(SEPARATOR);
    frame.put_slice(&body);

    Ok(frame.freeze())
}

/// Кодирует bulk-фрейм: `topic + ";bulk " + pub_id + ' ' + payload`.
///
/// Байты `payload` копируются как есть, без экранирования.
pub fn encode_bulk(
    topic: &str,
    pub_id: u32,
    payload: &[u8],
) -> Bytes {
    let id = pub_id.to_string();

    let mut frame = BytesMut::with_capacity(
        topic.len() + BULK_TOPIC_SUFFIX.len() + 1 + id.len() + 1 + payload.len(),
    );
    frame.put_slice(topic.as_bytes());
    frame.put_slice(BULK_TOPIC_SUFFIX.as_bytes());
    frame.put_u8(SEPARATOR);
    frame.put_slice(id.as_bytes());
    frame.put_u8(SEPARATOR);
    frame.put_slice(payload);

    frame.freeze()
}

/// Топик bulk-компаньона для события с топиком `topic`.
pub fn bulk_topic(topic: &str) -> String {
    format!("{topic}{BULK_TOPIC_SUFFIX}")
}

/// Является ли `topic` топиком bulk-фрейма.
pub fn is_bulk_topic(topic: &[u8]) -> bool {
    topic.ends_with(BULK_SUFFIX)
}

/// Делит фрейм по первому пробельному символу на топик и тело.
///
/// Тело начинается сразу после одного байта-разделителя.
pub fn split(frame: &[u8]) -> Result<(&[u8], &[u8]), FramingError> {
    let pos = frame
        .iter()
        .position(|b| is_whitespace(*b))
        .ok_or(FramingError::MissingSeparator)?;

    if pos == 0 {
        return Err(FramingError::EmptyTopic);
    }

    Ok((&frame[..pos], &frame[pos + 1..]))
}

/// Декодирует фрейм в [`Message`].
///
/// Тело bulk-фрейма возвращается как непрозрачные байты (без префикса
/// `<pub_id> `), тело обычного фрейма разбирается как JSON-объект.
pub fn decode(frame: Bytes) -> Result<Message, FrameError> {
    let (topic, body) = split(&frame)?;
    let topic_len = topic.len();

    let topic = std::str::from_utf8(topic)
        .map_err(|e| FramingError::InvalidTopic {
            reason: e.to_string(),
        })?
        .to_string();

    let payload = if is_bulk_topic(topic.as_bytes()) {
        let body = frame.slice(topic_len + 1..);
        Payload::Bulk(decode_bulk_body(body)?)
    } else {
        Payload::Event(Event::from_json(body)?)
    };

    Ok(Message { topic, payload })
}

/// Разбирает тело bulk-фрейма `<pub_id> <данные>`.
pub fn decode_bulk_body(body: Bytes) -> Result<BulkPayload, FramingError> {
    let pos = memchr::memchr(SEPARATOR, &body).ok_or(FramingError::MissingPublicationId)?;
    let digits = &body[..pos];

    let invalid = || FramingError::InvalidPublicationId {
        value: String::from_utf8_lossy(digits).into_owned(),
    };

    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }

    let pub_id = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(invalid)?;

    Ok(BulkPayload {
        pub_id,
        data: body.slice(pos + 1..),
    })
}

#[inline]
fn is_whitespace(b: u8) -> bool {
    // Помимо ASCII-пробелов учитываем вертикальную табуляцию.
    b.is_ascii_whitespace() || b == 0x0b
}
