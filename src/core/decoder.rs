//! Incremental UTF-8 decoding of the relay's plain-text byte stream.
//!
//! The relay streams raw text with no framing, so chunk boundaries can fall
//! anywhere, including in the middle of a multi-byte character. The decoder
//! holds back incomplete trailing bytes until the next chunk arrives and
//! flushes them once when the stream ends.

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};

const REPLACEMENT: char = char::REPLACEMENT_CHARACTER;

#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes as much of `chunk` as possible, keeping an incomplete trailing
    /// sequence for the next call. Invalid bytes become U+FFFD.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        let mut consumed = 0;

        loop {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    consumed = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_up_to = consumed + err.valid_up_to();
                    // Safe: from_utf8 vouched for this prefix.
                    out.push_str(
                        std::str::from_utf8(&self.pending[consumed..valid_up_to])
                            .unwrap_or_default(),
                    );
                    match err.error_len() {
                        Some(invalid_len) => {
                            out.push(REPLACEMENT);
                            consumed = valid_up_to + invalid_len;
                        }
                        None => {
                            // Incomplete sequence at the end; wait for more bytes.
                            consumed = valid_up_to;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..consumed);
        out
    }

    /// Flushes whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let leftover = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&leftover).into_owned()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

enum DecodeState<S> {
    Reading(S, Utf8StreamDecoder),
    Done,
}

/// Turns a byte stream into a lazy sequence of non-empty text fragments.
///
/// The sequence ends when the source ends (after one final flush) or right
/// after the first source error, which is passed through unchanged.
pub fn decode_stream<S, E>(source: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    stream::unfold(
        DecodeState::Reading(source, Utf8StreamDecoder::new()),
        |state| async move {
            let DecodeState::Reading(mut source, mut decoder) = state else {
                return None;
            };

            loop {
                match source.next().await {
                    Some(Ok(chunk)) => {
                        let text = decoder.decode(&chunk);
                        if !text.is_empty() {
                            return Some((Ok(text), DecodeState::Reading(source, decoder)));
                        }
                    }
                    Some(Err(err)) => return Some((Err(err), DecodeState::Done)),
                    None => {
                        let tail = decoder.finish();
                        if tail.is_empty() {
                            return None;
                        }
                        return Some((Ok(tail), DecodeState::Done));
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_stream(chunks: Vec<&[u8]>) -> impl Stream<Item = Result<Bytes, String>> + Unpin {
        stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect(chunks: Vec<&[u8]>) -> Vec<String> {
        decode_stream(byte_stream(chunks))
            .map(|item| item.expect("no error"))
            .collect()
            .await
    }

    #[test]
    fn split_multibyte_character_is_held_back() {
        let mut decoder = Utf8StreamDecoder::new();
        let bytes = "é".as_bytes();
        assert_eq!(decoder.decode(&bytes[..1]), "");
        assert!(decoder.has_pending());
        assert_eq!(decoder.decode(&bytes[1..]), "é");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{fffd}b");
    }

    #[test]
    fn truncated_tail_is_flushed_lossily() {
        let mut decoder = Utf8StreamDecoder::new();
        let bytes = "日".as_bytes();
        assert_eq!(decoder.decode(&bytes[..2]), "");
        assert_eq!(decoder.finish(), "\u{fffd}");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn decoding_is_independent_of_chunk_boundaries() {
        let text = "It's early days — 第三章 🎬 ok";
        let bytes = text.as_bytes();
        for split_a in 0..bytes.len() {
            for split_b in split_a..bytes.len() {
                let mut decoder = Utf8StreamDecoder::new();
                let mut out = decoder.decode(&bytes[..split_a]);
                out.push_str(&decoder.decode(&bytes[split_a..split_b]));
                out.push_str(&decoder.decode(&bytes[split_b..]));
                out.push_str(&decoder.finish());
                assert_eq!(out, text, "splits at {split_a}/{split_b}");
            }
        }
    }

    #[tokio::test]
    async fn stream_yields_only_non_empty_fragments() {
        let emoji = "🎬".as_bytes();
        let fragments = collect(vec![b"I", &emoji[..2], &emoji[2..], b"", b" done"]).await;
        assert_eq!(fragments, vec!["I", "🎬", " done"]);
    }

    #[tokio::test]
    async fn empty_source_yields_nothing() {
        assert!(collect(vec![]).await.is_empty());
    }

    #[tokio::test]
    async fn source_error_ends_the_sequence() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"foo")),
            Err("boom".to_string()),
            Ok(Bytes::from_static(b"bar")),
        ]);
        let items: Vec<_> = decode_stream(source).collect().await;
        assert_eq!(items, vec![Ok("foo".to_string()), Err("boom".to_string())]);
    }
}
