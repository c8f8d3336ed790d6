//! Character-set adapters for CSV files in legacy encodings.
//!
//! CSV processing happens in UTF-8. When a file uses one of the supported
//! single- or double-byte encodings, reads are decoded and writes encoded on
//! the fly. Anything else, including unknown names, is passed through.

use encoding_rs::{Encoder, EncoderResult, Encoding};
use encoding_rs_io::{DecodeReaderBytes, DecodeReaderBytesBuilder};
use std::io::{self, Read, Write};
use tracing::warn;

/// The encoding of a CSV file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    /// UTF-8, bytes passed through untouched
    #[default]
    Utf8,
    Encoded(&'static Encoding),
}

impl Charset {
    /// Resolves a charset name.
    ///
    /// Never fails: `raw`, `utf-8`, empty and unknown names all mean UTF-8.
    /// ISO-8859-1 and ISO-8859-9 resolve to their Windows supersets
    /// (windows-1252 and windows-1254).
    pub fn from_name(name: &str) -> Charset {
        let encoding = match name.trim().to_ascii_lowercase().as_str() {
            "" | "raw" | "utf-8" | "utf8" => return Charset::Utf8,
            "gbk" | "cp936" => encoding_rs::GBK,
            "gb18030" => encoding_rs::GB18030,
            "iso-8859-1" | "latin1" | "cp1252" | "windows-1252" => encoding_rs::WINDOWS_1252,
            "iso-8859-2" => encoding_rs::ISO_8859_2,
            "iso-8859-3" => encoding_rs::ISO_8859_3,
            "iso-8859-4" => encoding_rs::ISO_8859_4,
            "iso-8859-9" | "windows-1254" => encoding_rs::WINDOWS_1254,
            "iso-8859-10" => encoding_rs::ISO_8859_10,
            "iso-8859-13" => encoding_rs::ISO_8859_13,
            "iso-8859-14" => encoding_rs::ISO_8859_14,
            "iso-8859-15" => encoding_rs::ISO_8859_15,
            "iso-8859-16" => encoding_rs::ISO_8859_16,
            other => {
                warn!("Unknown file charset '{}', reading and writing UTF-8", other);
                return Charset::Utf8;
            }
        };
        Charset::Encoded(encoding)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Encoded(encoding) => encoding.name(),
        }
    }

    /// Wraps a byte source so it yields UTF-8.
    pub fn wrap_reader<R: Read>(self, reader: R) -> TranscodeReader<R> {
        match self {
            Charset::Utf8 => TranscodeReader::Identity(reader),
            Charset::Encoded(encoding) => TranscodeReader::Decoding(
                DecodeReaderBytesBuilder::new()
                    .encoding(Some(encoding))
                    .build(reader),
            ),
        }
    }

    /// Wraps a byte sink so UTF-8 written to it lands in this charset.
    pub fn wrap_writer<W: Write>(self, writer: W) -> TranscodeWriter<W> {
        match self {
            Charset::Utf8 => TranscodeWriter::Identity(writer),
            Charset::Encoded(encoding) => TranscodeWriter::Encoding(EncodingWriter {
                inner: writer,
                encoder: encoding.new_encoder(),
                pending: Vec::new(),
            }),
        }
    }
}

/// Reader side of the transform
pub enum TranscodeReader<R: Read> {
    Identity(R),
    Decoding(DecodeReaderBytes<R, Vec<u8>>),
}

impl<R: Read> Read for TranscodeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            TranscodeReader::Identity(r) => r.read(buf),
            TranscodeReader::Decoding(r) => r.read(buf),
        }
    }
}

/// Writer side of the transform.
///
/// Call [`TranscodeWriter::finish`] once done; it flushes the encoder and
/// reports a dangling partial character.
pub enum TranscodeWriter<W: Write> {
    Identity(W),
    Encoding(EncodingWriter<W>),
}

impl<W: Write> TranscodeWriter<W> {
    pub fn finish(self) -> io::Result<W> {
        match self {
            TranscodeWriter::Identity(mut w) => {
                w.flush()?;
                Ok(w)
            }
            TranscodeWriter::Encoding(w) => w.finish(),
        }
    }
}

impl<W: Write> Write for TranscodeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TranscodeWriter::Identity(w) => w.write(buf),
            TranscodeWriter::Encoding(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TranscodeWriter::Identity(w) => w.flush(),
            TranscodeWriter::Encoding(w) => w.flush(),
        }
    }
}

/// Encodes UTF-8 input into a legacy charset.
///
/// A UTF-8 sequence split across two `write` calls is held back until it is
/// complete. Characters the charset cannot represent fail the write.
pub struct EncodingWriter<W: Write> {
    inner: W,
    encoder: Encoder,
    pending: Vec<u8>,
}

impl<W: Write> EncodingWriter<W> {
    pub fn finish(mut self) -> io::Result<W> {
        if !self.pending.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "stream ended inside a UTF-8 sequence",
            ));
        }
        encode_into(&mut self.encoder, "", true, &mut self.inner)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for EncodingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);

        let complete = match std::str::from_utf8(&self.pending) {
            Ok(text) => text.len(),
            // Truncated sequence at the end: keep it for the next write
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        };

        let text = std::str::from_utf8(&self.pending[..complete])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        encode_into(&mut self.encoder, text, false, &mut self.inner)?;
        self.pending.drain(..complete);

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn encode_into<W: Write>(
    encoder: &mut Encoder,
    mut text: &str,
    last: bool,
    out: &mut W,
) -> io::Result<()> {
    let mut buffer: Vec<u8> = Vec::new();
    loop {
        buffer.clear();
        let needed = encoder
            .max_buffer_length_from_utf8_without_replacement(text.len())
            .unwrap_or(text.len() * 4 + 16);
        buffer.reserve(needed);

        let (result, read) =
            encoder.encode_from_utf8_to_vec_without_replacement(text, &mut buffer, last);
        out.write_all(&buffer)?;
        text = &text[read..];

        match result {
            EncoderResult::InputEmpty => return Ok(()),
            EncoderResult::OutputFull => continue,
            EncoderResult::Unmappable(c) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "character {:?} cannot be represented in {}",
                        c,
                        encoder.encoding().name()
                    ),
                ))
            }
        }
    }
}
