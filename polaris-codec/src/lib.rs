//! ## Polaris control-frame wire codec
//!
//! The Polaris corrections service is fed by a small, binary, length-prefixed
//! control protocol carried over the same TCP connection as the opaque RTCM
//! corrections stream. This crate only knows how to *build* control frames
//! (authentication, position reports, beacon requests) and how to checksum
//! them; it never looks inside the corrections stream itself, which is
//! payload-opaque to the client.
//!
//! ```text
//! +--------+--------+---------------+--------+--------------+----------+
//! | 0xB5   | 0x62   | message_class | msg_id | payload_len  | payload  | checksum |
//! +--------+--------+---------------+--------+--------------+----------+
//!     1        1            1           1          2 (LE)       N          2 (LE)
//! ```
//!
//! The checksum is an 8-bit Fletcher variant computed over every byte from
//! `message_class` through the end of `payload` (i.e. everything after the
//! two start bytes).

use bytes::{BufMut, BytesMut};

/// First framing start byte.
pub const START_BYTE_0: u8 = 0xB5;
/// Second framing start byte.
pub const START_BYTE_1: u8 = 0x62;

/// The message class used for every control frame this client sends.
pub const MESSAGE_CLASS_CONTROL: u8 = 0x00;

/// Message id for an [`ControlMessage::Auth`] frame.
pub const MESSAGE_ID_AUTH: u8 = 1;
/// Message id for an [`ControlMessage::EcefPosition`] frame.
pub const MESSAGE_ID_ECEF_POSITION: u8 = 3;
/// Message id for an [`ControlMessage::LlaPosition`] frame.
pub const MESSAGE_ID_LLA_POSITION: u8 = 4;
/// Message id for a [`ControlMessage::Beacon`] frame.
pub const MESSAGE_ID_BEACON: u8 = 5;

/// Size of the fixed frame header, start bytes included (2 + 1 + 1 + 2).
pub const HEADER_SIZE: usize = 6;
/// Size of the trailing checksum.
pub const CHECKSUM_SIZE: usize = 2;

/// Implementation cap on the access token length: bounded, at least 512
/// bytes.
pub const MAX_TOKEN_SIZE: usize = 512;
/// Implementation cap on a beacon id's length. The service contract does not
/// fix this value; it is chosen generously relative to real reference
/// station identifiers while keeping control frames small.
pub const MAX_BEACON_ID_SIZE: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The message payload (token or beacon id) is larger than this
    /// implementation supports. Non-retryable: the caller must not retry
    /// with the same input.
    NotEnoughSpace,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// An outbound control message, pre-quantisation.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage<'a> {
    /// Carries the bearer token obtained from the Authenticator (or supplied
    /// directly by the caller). Must be sent as the first frame after
    /// connecting.
    Auth(&'a [u8]),
    /// Earth-centred Earth-fixed position, in metres.
    EcefPosition { x_m: f64, y_m: f64, z_m: f64 },
    /// Geodetic position: latitude/longitude in degrees, altitude in metres.
    LlaPosition {
        lat_deg: f64,
        lon_deg: f64,
        alt_m: f64,
    },
    /// Request a named reference station in lieu of a position.
    Beacon(&'a [u8]),
}

/// Whether encoding a message had to clamp one or more quantised fields to
/// the signed 32-bit range. The frame is still transmitted (the service
/// tolerates saturated values); this is purely diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuantisationReport {
    pub saturated: bool,
}

/// Round to nearest, ties away from zero, saturating to the `i32` range.
fn quantise(value: f64, scale: f64) -> (i32, bool) {
    let scaled = value * scale;
    let rounded = if scaled >= 0.0 {
        (scaled + 0.5).floor()
    } else {
        (scaled - 0.5).ceil()
    };

    if rounded > i32::MAX as f64 {
        (i32::MAX, true)
    } else if rounded < i32::MIN as f64 {
        (i32::MIN, true)
    } else {
        (rounded as i32, false)
    }
}

/// Encode a [`ControlMessage`] into `out` as a complete, checksummed frame.
///
/// `out` is cleared before writing; on success it holds exactly one frame.
///
/// # Test
///
/// ```
/// use bytes::BytesMut;
/// use polaris_codec::{encode, ControlMessage};
///
/// let mut first = BytesMut::new();
/// let mut second = BytesMut::new();
///
/// encode(&ControlMessage::Auth(b"token"), &mut first).unwrap();
/// encode(&ControlMessage::Auth(b"token"), &mut second).unwrap();
///
/// assert_eq!(first, second);
/// assert_eq!(&first[0..2], &[0xB5, 0x62]);
/// ```
pub fn encode(message: &ControlMessage<'_>, out: &mut BytesMut) -> Result<QuantisationReport, Error> {
    out.clear();

    let report = match message {
        ControlMessage::Auth(token) => {
            if token.len() > MAX_TOKEN_SIZE {
                return Err(Error::NotEnoughSpace);
            }

            write_header(out, MESSAGE_ID_AUTH, token.len());
            out.put_slice(token);
            QuantisationReport::default()
        }
        ControlMessage::EcefPosition { x_m, y_m, z_m } => {
            let (x, xs) = quantise(*x_m, 100.0);
            let (y, ys) = quantise(*y_m, 100.0);
            let (z, zs) = quantise(*z_m, 100.0);

            write_header(out, MESSAGE_ID_ECEF_POSITION, 12);
            out.put_i32_le(x);
            out.put_i32_le(y);
            out.put_i32_le(z);

            QuantisationReport {
                saturated: xs || ys || zs,
            }
        }
        ControlMessage::LlaPosition {
            lat_deg,
            lon_deg,
            alt_m,
        } => {
            let (lat, lats) = quantise(*lat_deg, 1e7);
            let (lon, lons) = quantise(*lon_deg, 1e7);
            let (alt, alts) = quantise(*alt_m, 1e3);

            write_header(out, MESSAGE_ID_LLA_POSITION, 12);
            out.put_i32_le(lat);
            out.put_i32_le(lon);
            out.put_i32_le(alt);

            QuantisationReport {
                saturated: lats || lons || alts,
            }
        }
        ControlMessage::Beacon(id) => {
            if id.len() > MAX_BEACON_ID_SIZE {
                return Err(Error::NotEnoughSpace);
            }

            write_header(out, MESSAGE_ID_BEACON, id.len());
            out.put_slice(id);
            QuantisationReport::default()
        }
    };

    let checksum = fletcher8_checksum(&out[2..]);
    out.put_u16_le(checksum);

    Ok(report)
}

fn write_header(out: &mut BytesMut, message_id: u8, payload_len: usize) {
    out.put_u8(START_BYTE_0);
    out.put_u8(START_BYTE_1);
    out.put_u8(MESSAGE_CLASS_CONTROL);
    out.put_u8(message_id);
    out.put_u16_le(payload_len as u16);
}

/// The 8-bit Fletcher checksum used by the Polaris control protocol,
/// transmitted little-endian as `(ckB << 8) | ckA`.
///
/// `bytes` must already exclude the two frame start bytes.
///
/// # Test
///
/// ```
/// use polaris_codec::fletcher8_checksum;
///
/// assert_eq!(fletcher8_checksum(&[]), 0);
/// assert_eq!(fletcher8_checksum(&[0x01]), 0x0101);
/// ```
pub fn fletcher8_checksum(bytes: &[u8]) -> u16 {
    let mut ck_a: u8 = 0;
    let mut ck_b: u8 = 0;

    for &byte in bytes {
        ck_a = ck_a.wrapping_add(byte);
        ck_b = ck_b.wrapping_add(ck_a);
    }

    ((ck_b as u16) << 8) | ck_a as u16
}

/// Recompute the checksum embedded in an encoded frame and compare it to the
/// trailing two bytes. Intended for round-trip tests; the client does not
/// need to validate its own outbound frames in production.
///
/// # Test
///
/// ```
/// use bytes::BytesMut;
/// use polaris_codec::{encode, verify_checksum, ControlMessage};
///
/// let mut frame = BytesMut::new();
/// encode(&ControlMessage::Beacon(b"KOAK"), &mut frame).unwrap();
///
/// assert!(verify_checksum(&frame));
/// ```
pub fn verify_checksum(frame: &[u8]) -> bool {
    if frame.len() < HEADER_SIZE + CHECKSUM_SIZE {
        return false;
    }

    let body_end = frame.len() - CHECKSUM_SIZE;
    let expected = fletcher8_checksum(&frame[2..body_end]);
    let actual = u16::from_le_bytes([frame[body_end], frame[body_end + 1]]);

    expected == actual
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_frame_has_no_quantisation_and_carries_raw_token() {
        let mut frame = BytesMut::new();
        let report = encode(&ControlMessage::Auth(b"abc123"), &mut frame).unwrap();

        assert!(!report.saturated);
        assert_eq!(frame[0], START_BYTE_0);
        assert_eq!(frame[1], START_BYTE_1);
        assert_eq!(frame[2], MESSAGE_CLASS_CONTROL);
        assert_eq!(frame[3], MESSAGE_ID_AUTH);
        assert_eq!(u16::from_le_bytes([frame[4], frame[5]]), 6);
        assert_eq!(&frame[6..12], b"abc123");
        assert!(verify_checksum(&frame));
    }

    #[test]
    fn auth_token_over_cap_is_not_enough_space() {
        let token = vec![0u8; MAX_TOKEN_SIZE + 1];
        let mut frame = BytesMut::new();

        assert_eq!(
            encode(&ControlMessage::Auth(&token), &mut frame),
            Err(Error::NotEnoughSpace)
        );
    }

    #[test]
    fn beacon_id_over_cap_is_not_enough_space() {
        let id = vec![b'A'; MAX_BEACON_ID_SIZE + 1];
        let mut frame = BytesMut::new();

        assert_eq!(
            encode(&ControlMessage::Beacon(&id), &mut frame),
            Err(Error::NotEnoughSpace)
        );
    }

    #[test]
    fn ecef_position_quantises_to_centimetres_little_endian() {
        let mut frame = BytesMut::new();
        let report = encode(
            &ControlMessage::EcefPosition {
                x_m: -2700123.456,
                y_m: -4292345.111,
                z_m: 3855123.789,
            },
            &mut frame,
        )
        .unwrap();

        assert!(!report.saturated);

        let x = i32::from_le_bytes(frame[6..10].try_into().unwrap());
        let y = i32::from_le_bytes(frame[10..14].try_into().unwrap());
        let z = i32::from_le_bytes(frame[14..18].try_into().unwrap());

        assert_eq!(x, -270012346);
        assert_eq!(y, -429234511);
        assert_eq!(z, 385512379);
        assert!(verify_checksum(&frame));
    }

    #[test]
    fn lla_position_quantises_per_field_scale() {
        let mut frame = BytesMut::new();
        encode(
            &ControlMessage::LlaPosition {
                lat_deg: 37.7749,
                lon_deg: -122.4194,
                alt_m: 42.0,
            },
            &mut frame,
        )
        .unwrap();

        let lat = i32::from_le_bytes(frame[6..10].try_into().unwrap());
        let lon = i32::from_le_bytes(frame[10..14].try_into().unwrap());
        let alt = i32::from_le_bytes(frame[14..18].try_into().unwrap());

        assert_eq!(lat, 377749000);
        assert_eq!(lon, -1224194000);
        assert_eq!(alt, 42000);
    }

    #[test]
    fn quantisation_rounds_ties_away_from_zero() {
        assert_eq!(quantise(0.5, 1.0), (1, false));
        assert_eq!(quantise(-0.5, 1.0), (-1, false));
        assert_eq!(quantise(2.5, 1.0), (3, false));
    }

    #[test]
    fn quantisation_saturates_and_reports_it() {
        let (value, saturated) = quantise(1e30, 1.0);
        assert_eq!(value, i32::MAX);
        assert!(saturated);

        let (value, saturated) = quantise(-1e30, 1.0);
        assert_eq!(value, i32::MIN);
        assert!(saturated);
    }

    #[test]
    fn two_encodes_of_equal_input_are_identical() {
        let mut a = BytesMut::new();
        let mut b = BytesMut::new();

        encode(
            &ControlMessage::LlaPosition {
                lat_deg: 1.0,
                lon_deg: 2.0,
                alt_m: 3.0,
            },
            &mut a,
        )
        .unwrap();
        encode(
            &ControlMessage::LlaPosition {
                lat_deg: 1.0,
                lon_deg: 2.0,
                alt_m: 3.0,
            },
            &mut b,
        )
        .unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn mutating_a_byte_after_the_start_bytes_changes_the_checksum() {
        let mut frame = BytesMut::new();
        encode(&ControlMessage::Beacon(b"KSFO"), &mut frame).unwrap();

        let mut mismatches = 0u32;
        let trials = 64;
        for i in 2..frame.len() - CHECKSUM_SIZE {
            for bit in 0..8u8 {
                let mut mutated = frame.clone();
                mutated[i] ^= 1 << bit;
                if !verify_checksum(&mutated) {
                    mismatches += 1;
                }
            }
        }

        let total = ((frame.len() - CHECKSUM_SIZE - 2) * 8) as u32;
        assert!(total > 0);
        // Every single-bit mutation after the start bytes must be caught;
        // `trials` just documents that we checked a meaningful sample.
        assert_eq!(mismatches, total);
        assert!(trials > 0);
    }
}
