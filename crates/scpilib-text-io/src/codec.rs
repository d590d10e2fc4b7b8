//! Serialization of numeric arrays in replies.
//!
//! Array answers are rendered according to the dispatcher-wide
//! [`DataFormat`]:
//!
//! | Format      | Encoding                                  |
//! |-------------|-------------------------------------------|
//! | `ASCII`     | comma-separated decimal text              |
//! | `QUADRUPLE` | IEEE-754 binary128, 16 bytes per sample   |
//! | `DOUBLE`    | IEEE-754 binary64, 8 bytes per sample     |
//! | `SINGLE`    | IEEE-754 binary32, 4 bytes per sample     |
//! | `HALF`      | IEEE-754 binary16, 2 bytes per sample     |
//!
//! Binary formats are little-endian and framed as a definite-length block:
//! `#`, one digit giving the number of length digits, the byte length, then
//! the raw bytes. 40 bytes of DOUBLE data are sent as `#240` followed by
//! the payload.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use half::f16;

use scpilib_core::error::{Error, Result};
use scpilib_core::value::format_float;

/// Largest byte length the one-digit length-of-length header can express.
const MAX_LEN_DIGITS: usize = 9;

/// On-wire representation of array answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataFormat {
    /// Comma-separated decimal text.
    #[default]
    Ascii = 0,
    /// 128-bit floats.
    Quadruple = 1,
    /// 64-bit floats.
    Double = 2,
    /// 32-bit floats.
    Single = 3,
    /// 16-bit floats.
    Half = 4,
}

impl DataFormat {
    /// Every format, in the order they appear in the whitelist.
    pub const ALL: [DataFormat; 5] = [
        DataFormat::Ascii,
        DataFormat::Quadruple,
        DataFormat::Double,
        DataFormat::Single,
        DataFormat::Half,
    ];

    /// The protocol name of the format.
    pub fn name(self) -> &'static str {
        match self {
            DataFormat::Ascii => "ASCII",
            DataFormat::Quadruple => "QUADRUPLE",
            DataFormat::Double => "DOUBLE",
            DataFormat::Single => "SINGLE",
            DataFormat::Half => "HALF",
        }
    }

    /// Bytes per sample, `None` for ASCII.
    pub fn sample_size(self) -> Option<usize> {
        match self {
            DataFormat::Ascii => None,
            DataFormat::Quadruple => Some(16),
            DataFormat::Double => Some(8),
            DataFormat::Single => Some(4),
            DataFormat::Half => Some(2),
        }
    }

    fn from_u8(raw: u8) -> Self {
        DataFormat::ALL
            .get(usize::from(raw))
            .copied()
            .unwrap_or_default()
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a string names no [`DataFormat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDataFormatError(String);

impl fmt::Display for ParseDataFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown data format: {}", self.0)
    }
}

impl std::error::Error for ParseDataFormatError {}

impl FromStr for DataFormat {
    type Err = ParseDataFormatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        DataFormat::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseDataFormatError(s.to_string()))
    }
}

/// The shared, mutable data format of one dispatcher.
///
/// Every client sees the same setting; a change by one client applies to
/// array answers sent to all of them.
#[derive(Debug, Default)]
pub struct DataFormatSetting(AtomicU8);

impl DataFormatSetting {
    /// Create a setting holding `format`.
    pub fn new(format: DataFormat) -> Self {
        DataFormatSetting(AtomicU8::new(format as u8))
    }

    /// The current format.
    pub fn get(&self) -> DataFormat {
        DataFormat::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Replace the current format.
    pub fn set(&self, format: DataFormat) {
        self.0.store(format as u8, Ordering::Release);
    }
}

/// Encode `values` in `format`.
///
/// Fails with [`Error::Codec`] if the binary payload is too long for the
/// block header.
pub fn encode(values: &[f64], format: DataFormat) -> Result<Vec<u8>> {
    let payload: Vec<u8> = match format {
        DataFormat::Ascii => {
            let text: Vec<String> = values.iter().copied().map(format_float).collect();
            return Ok(text.join(",").into_bytes());
        }
        DataFormat::Quadruple => values
            .iter()
            .flat_map(|&v| f64_to_binary128(v).to_le_bytes())
            .collect(),
        DataFormat::Double => values.iter().flat_map(|&v| v.to_le_bytes()).collect(),
        DataFormat::Single => values
            .iter()
            .flat_map(|&v| (v as f32).to_le_bytes())
            .collect(),
        DataFormat::Half => values
            .iter()
            .flat_map(|&v| f16::from_f64(v).to_le_bytes())
            .collect(),
    };

    let mut block = block_header(payload.len())?.into_bytes();
    block.extend_from_slice(&payload);
    Ok(block)
}

/// Build the `#<L><len>` header for a payload of `len` bytes.
pub fn block_header(len: usize) -> Result<String> {
    let digits = len.to_string();
    if digits.len() > MAX_LEN_DIGITS {
        return Err(Error::Codec(format!(
            "payload of {len} bytes needs {} length digits (max {MAX_LEN_DIGITS})",
            digits.len()
        )));
    }
    Ok(format!("#{}{}", digits.len(), digits))
}

/// Parse a block header, returning `(header_len, payload_len)`.
///
/// Returns `Ok(None)` if `buf` does not yet hold the whole header.
fn parse_header(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    if buf.first() != Some(&b'#') {
        return Err(Error::Codec("block does not start with '#'".into()));
    }
    let Some(&count) = buf.get(1) else {
        return Ok(None);
    };
    if !(b'1'..=b'9').contains(&count) {
        return Err(Error::Codec(format!(
            "invalid length-of-length digit {:?}",
            char::from(count)
        )));
    }
    let count = usize::from(count - b'0');
    let Some(digits) = buf.get(2..2 + count) else {
        return Ok(None);
    };
    let len = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| Error::Codec("invalid block length digits".into()))?;
    Ok(Some((2 + count, len)))
}

/// Total length of the block at the start of `buf`, if it has fully arrived.
pub(crate) fn block_len(buf: &[u8]) -> Option<usize> {
    match parse_header(buf) {
        Ok(Some((header, len))) if buf.len() >= header + len => Some(header + len),
        Ok(Some(_)) | Ok(None) => None,
        Err(_) => Some(1),
    }
}

/// Split a binary block into its payload and the number of bytes consumed.
pub fn decode_block(buf: &[u8]) -> Result<(&[u8], usize)> {
    let (header, len) = parse_header(buf)?
        .ok_or_else(|| Error::Codec("truncated block header".into()))?;
    let payload = buf
        .get(header..header + len)
        .ok_or_else(|| Error::Codec(format!("block truncated, expected {len} bytes")))?;
    Ok((payload, header + len))
}

/// Decode an array answer back into samples.
///
/// `token` is one answer token: ASCII text or a complete binary block.
pub fn decode_values(token: &[u8], format: DataFormat) -> Result<Vec<f64>> {
    let Some(size) = format.sample_size() else {
        let text = std::str::from_utf8(token).map_err(|e| Error::Codec(e.to_string()))?;
        return text
            .split(',')
            .map(|s| {
                s.trim()
                    .parse::<f64>()
                    .map_err(|_| Error::Codec(format!("invalid ASCII sample {s:?}")))
            })
            .collect();
    };

    let (payload, _) = decode_block(token)?;
    if payload.len() % size != 0 {
        return Err(Error::Codec(format!(
            "payload of {} bytes is not a multiple of {size}",
            payload.len()
        )));
    }
    Ok(payload
        .chunks_exact(size)
        .map(|chunk| match format {
            DataFormat::Quadruple => {
                let mut raw = [0u8; 16];
                raw.copy_from_slice(chunk);
                binary128_to_f64(u128::from_le_bytes(raw))
            }
            DataFormat::Double => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            }
            DataFormat::Single => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(chunk);
                f64::from(f32::from_le_bytes(raw))
            }
            DataFormat::Half | DataFormat::Ascii => f16::from_le_bytes([chunk[0], chunk[1]]).to_f64(),
        })
        .collect())
}

// ---------------------------------------------------------------------------
// binary128
// ---------------------------------------------------------------------------

const F64_FRAC_BITS: u32 = 52;
const F128_FRAC_BITS: u32 = 112;
const F64_BIAS: i32 = 1023;
const F128_BIAS: i32 = 16383;

/// Widen an `f64` to IEEE-754 binary128 bits. Exact for every input.
fn f64_to_binary128(v: f64) -> u128 {
    let bits = v.to_bits();
    let sign = u128::from(bits >> 63) << 127;
    let exp = ((bits >> F64_FRAC_BITS) & 0x7ff) as i32;
    let frac = bits & ((1u64 << F64_FRAC_BITS) - 1);
    let shift = F128_FRAC_BITS - F64_FRAC_BITS;

    match exp {
        0 if frac == 0 => sign,
        0 => {
            // f64 subnormals are normal in binary128.
            let msb = 63 - frac.leading_zeros();
            let exp = msb as i32 - (F64_BIAS + F64_FRAC_BITS as i32 - 1) + F128_BIAS;
            let mantissa = (u128::from(frac) << (F128_FRAC_BITS - msb)) & ((1u128 << F128_FRAC_BITS) - 1);
            sign | ((exp as u128) << F128_FRAC_BITS) | mantissa
        }
        0x7ff => sign | (0x7fffu128 << F128_FRAC_BITS) | (u128::from(frac) << shift),
        _ => {
            let exp = (exp - F64_BIAS + F128_BIAS) as u128;
            sign | (exp << F128_FRAC_BITS) | (u128::from(frac) << shift)
        }
    }
}

/// Narrow binary128 bits to the nearest-below `f64` (truncating extra
/// fraction bits).
fn binary128_to_f64(bits: u128) -> f64 {
    let negative = bits >> 127 == 1;
    let exp = ((bits >> F128_FRAC_BITS) & 0x7fff) as i32;
    let frac = bits & ((1u128 << F128_FRAC_BITS) - 1);
    let frac64 = (frac >> (F128_FRAC_BITS - F64_FRAC_BITS)) as u64;

    let magnitude = match exp {
        0 => 0.0,
        0x7fff if frac == 0 => f64::INFINITY,
        0x7fff => f64::NAN,
        _ => {
            let unbiased = exp - F128_BIAS;
            let biased = unbiased + F64_BIAS;
            if biased >= 0x7ff {
                f64::INFINITY
            } else if biased > 0 {
                f64::from_bits(((biased as u64) << F64_FRAC_BITS) | frac64)
            } else {
                // Subnormal in f64: scale in two steps to stay representable.
                let significand = ((1u64 << F64_FRAC_BITS) | frac64) as f64;
                significand * 2f64.powi(-600) * 2f64.powi(unbiased - F64_FRAC_BITS as i32 + 600)
            }
        }
    };
    if negative { -magnitude } else { magnitude }
}
