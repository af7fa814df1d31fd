//! Position formats: uncompressed lat/lon, base-91 compressed, and Maidenhead
//! locators embedded in status reports.

use crate::aprs::DecodeError;

const METERS_PER_FOOT: f64 = 0.3048;
const METERS_PER_ARC_MINUTE: f64 = 1852.0;

/// Length of `DDMM.mmN` + symbol table + `DDDMM.mmE` + symbol code
const UNCOMPRESSED_LENGTH: usize = 19;

/// Length of symbol table + `YYYY` + `XXXX` + symbol code + `cs` + `T`
const COMPRESSED_LENGTH: usize = 13;

/// Resolution of a position in arc minutes, indexed by the ambiguity level.
const AMBIGUITY_RESOLUTION: [f64; 5] = [0.01, 0.1, 1.0, 10.0, 60.0];

#[derive(Clone, Debug, PartialEq)]
pub struct Position {
    /// Latitude in degrees, north positive
    pub latitude: f64,

    /// Longitude in degrees, east positive
    pub longitude: f64,

    /// Altitude in meters
    pub altitude: Option<f64>,

    /// Horizontal accuracy in meters, if it can be derived from the encoding.
    pub horizontal_accuracy: Option<f64>,

    /// Vertical accuracy in meters. APRS doesn't transmit this, but it's kept
    /// so that positions from other sources fit the same shape.
    pub vertical_accuracy: Option<f64>,

    /// Speed in knots
    pub speed: Option<f64>,

    /// Course in degrees
    pub course: Option<u16>,

    /// Set for the "no position" symbol (`\.`).
    pub position_unknown: bool,

    pub symbol_table: char,
    pub symbol_code: char,
}

impl Position {
    fn new(latitude: f64, longitude: f64, symbol_table: u8, symbol_code: u8) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            horizontal_accuracy: None,
            vertical_accuracy: None,
            speed: None,
            course: None,
            position_unknown: symbol_table == b'\\' && symbol_code == b'.',
            symbol_table: symbol_table.into(),
            symbol_code: symbol_code.into(),
        }
    }
}

/// Parses the position that follows the data type identifier (and timestamp,
/// if any).
pub(super) fn parse(body: &str) -> Result<Position, DecodeError> {
    match body.as_bytes().first() {
        Some(b'0'..=b'9' | b' ') => parse_uncompressed(body),
        Some(_) => parse_compressed(body),
        None => Err(DecodeError::Truncated),
    }
}

fn parse_uncompressed(body: &str) -> Result<Position, DecodeError> {
    let bytes = body.as_bytes();
    if bytes.len() < UNCOMPRESSED_LENGTH || !bytes[..UNCOMPRESSED_LENGTH].is_ascii() {
        return Err(DecodeError::Truncated);
    }

    let latitude_field = &bytes[0..8];
    let symbol_table = bytes[8];
    let longitude_field = &bytes[9..18];
    let symbol_code = bytes[18];

    let (latitude, ambiguity) = parse_angle(latitude_field, 2, b'N', b'S')
        .filter(|(latitude, _)| latitude.abs() <= 90.0)
        .ok_or_else(|| {
            DecodeError::InvalidLatitude {
                value: String::from_utf8_lossy(latitude_field).into_owned(),
            }
        })?;

    // the ambiguity of the latitude applies to the longitude as well
    let mut longitude_blanked = longitude_field.to_vec();
    for index in &ambiguous_digits(3)[..ambiguity] {
        longitude_blanked[*index] = b' ';
    }
    let (longitude, _) = parse_angle(&longitude_blanked, 3, b'E', b'W')
        .filter(|(longitude, _)| longitude.abs() <= 180.0)
        .ok_or_else(|| {
            DecodeError::InvalidLongitude {
                value: String::from_utf8_lossy(longitude_field).into_owned(),
            }
        })?;

    if !is_symbol_table(symbol_table) {
        return Err(DecodeError::InvalidSymbolTable {
            value: symbol_table.into(),
        });
    }

    let mut position = Position::new(latitude, longitude, symbol_table, symbol_code);
    position.horizontal_accuracy = Some(AMBIGUITY_RESOLUTION[ambiguity] * METERS_PER_ARC_MINUTE);

    let mut comment = &body[UNCOMPRESSED_LENGTH..];
    if let Some((course, speed)) = parse_course_speed(comment) {
        position.course = course;
        position.speed = Some(speed);
        comment = &comment[7..];
    }
    position.altitude = altitude_from_comment(comment);

    Ok(position)
}

/// Indices of the digits that are blanked out for each level of ambiguity, in
/// the order they're blanked.
fn ambiguous_digits(degree_digits: usize) -> [usize; 4] {
    let dot = degree_digits + 2;
    [dot + 2, dot + 1, dot - 1, dot - 2]
}

/// Parses `DDMM.mmH` (or `DDDMM.mmH`) into signed degrees and the ambiguity
/// level.
fn parse_angle(
    field: &[u8],
    degree_digits: usize,
    positive: u8,
    negative: u8,
) -> Option<(f64, usize)> {
    let dot = degree_digits + 2;
    if field.len() != dot + 4 || field[dot] != b'.' {
        return None;
    }

    let blanked = ambiguous_digits(degree_digits);
    let ambiguity = blanked
        .iter()
        .take_while(|index| field[**index] == b' ')
        .count();

    let mut digits = field[..dot + 3].to_vec();
    for index in &blanked[..ambiguity] {
        digits[*index] = b'0';
    }
    let all_digits = digits
        .iter()
        .enumerate()
        .all(|(index, byte)| index == dot || byte.is_ascii_digit());
    if !all_digits {
        return None;
    }

    let degrees: f64 = std::str::from_utf8(&digits[..degree_digits])
        .ok()?
        .parse()
        .ok()?;
    let minutes: f64 = std::str::from_utf8(&digits[degree_digits..])
        .ok()?
        .parse()
        .ok()?;
    if minutes >= 60.0 {
        return None;
    }

    let angle = degrees + minutes / 60.0;
    let hemisphere = field[dot + 3];
    if hemisphere == positive {
        Some((angle, ambiguity))
    }
    else if hemisphere == negative {
        Some((-angle, ambiguity))
    }
    else {
        None
    }
}

/// Parses a `CCC/SSS` course/speed data extension.
fn parse_course_speed(comment: &str) -> Option<(Option<u16>, f64)> {
    let extension = comment.as_bytes().get(..7)?;
    if extension[3] != b'/' {
        return None;
    }
    let course: u16 = std::str::from_utf8(&extension[..3]).ok()?.parse().ok()?;
    let speed: u16 = std::str::from_utf8(&extension[4..]).ok()?.parse().ok()?;

    // a course of 0 means "unknown", 360 is due north
    let course = (1..=360).contains(&course).then_some(course);
    Some((course, speed.into()))
}

/// Finds an `/A=nnnnnn` altitude (in feet) anywhere in the comment.
fn altitude_from_comment(comment: &str) -> Option<f64> {
    let (_, rest) = comment.split_once("/A=")?;
    let feet: i32 = rest.get(..6)?.parse().ok()?;
    Some(f64::from(feet) * METERS_PER_FOOT)
}

fn parse_compressed(body: &str) -> Result<Position, DecodeError> {
    let bytes = body.as_bytes();
    if bytes.len() < COMPRESSED_LENGTH {
        return Err(DecodeError::Truncated);
    }

    let symbol_table = bytes[0];
    if !matches!(symbol_table, b'/' | b'\\' | b'A'..=b'Z' | b'a'..=b'j') {
        return Err(DecodeError::InvalidSymbolTable {
            value: char::from(symbol_table),
        });
    }

    let y = decode_base91(&bytes[1..5]).ok_or(DecodeError::InvalidCompressed)?;
    let x = decode_base91(&bytes[5..9]).ok_or(DecodeError::InvalidCompressed)?;
    let latitude = 90.0 - f64::from(y) / 380926.0;
    let longitude = -180.0 + f64::from(x) / 190463.0;
    if latitude.abs() > 90.0 || longitude.abs() > 180.0 {
        return Err(DecodeError::InvalidCompressed);
    }

    let symbol_code = bytes[9];
    if !symbol_code.is_ascii_graphic() {
        return Err(DecodeError::InvalidCompressed);
    }

    let mut position = Position::new(latitude, longitude, symbol_table, symbol_code);

    let (c, s, t) = (bytes[10], bytes[11], bytes[12]);
    if c != b' ' {
        let compression_type = t.wrapping_sub(33);
        let c = i32::from(c) - 33;
        let s = i32::from(s) - 33;

        if compression_type & 0x18 == 0x10 {
            let feet = 1.002f64.powi(c * 91 + s);
            position.altitude = Some(feet * METERS_PER_FOOT);
        }
        else if (0..=89).contains(&c) {
            // `c` is course / 4, `s` is log_1.08(speed + 1)
            position.course = u16::try_from(c * 4).ok().filter(|course| *course > 0);
            position.speed = Some(1.08f64.powi(s) - 1.0);
        }
    }

    if position.altitude.is_none() {
        position.altitude = body
            .get(COMPRESSED_LENGTH..)
            .and_then(altitude_from_comment);
    }

    Ok(position)
}

fn decode_base91(digits: &[u8]) -> Option<u32> {
    digits.iter().try_fold(0u32, |value, digit| {
        (b'!'..=b'{')
            .contains(digit)
            .then(|| value * 91 + u32::from(digit - b'!'))
    })
}

/// Parses a status report that starts with a Maidenhead locator followed by a
/// symbol, e.g. `IO91sx/- text`.
///
/// Returns the position (center of the locator cell) and the remaining status
/// text.
pub(super) fn parse_locator(body: &str) -> Option<(Position, &str)> {
    let bytes = body.as_bytes();

    let is_field = |byte: u8| matches!(byte.to_ascii_uppercase(), b'A'..=b'R');
    let is_subsquare = |byte: u8| matches!(byte.to_ascii_uppercase(), b'A'..=b'X');
    let ends_at = |index: usize| bytes.get(index).is_none_or(|byte| *byte == b' ');

    let square = bytes.get(..4)?;
    if !is_field(square[0])
        || !is_field(square[1])
        || !square[2].is_ascii_digit()
        || !square[3].is_ascii_digit()
    {
        return None;
    }

    let field_lon = f64::from(square[0].to_ascii_uppercase() - b'A');
    let field_lat = f64::from(square[1].to_ascii_uppercase() - b'A');
    let square_lon = f64::from(square[2] - b'0');
    let square_lat = f64::from(square[3] - b'0');
    let mut longitude = -180.0 + field_lon * 20.0 + square_lon * 2.0;
    let mut latitude = -90.0 + field_lat * 10.0 + square_lat;

    let subsquare = bytes
        .get(4..8)
        .filter(|rest| is_subsquare(rest[0]) && is_subsquare(rest[1]))
        .filter(|rest| is_symbol_table(rest[2]) && rest[3].is_ascii_graphic() && ends_at(8));

    let (symbol_table, symbol_code, cell_height, text_start) = if let Some(rest) = subsquare {
        longitude += f64::from(rest[0].to_ascii_uppercase() - b'A') * 5.0 / 60.0 + 2.5 / 60.0;
        latitude += f64::from(rest[1].to_ascii_uppercase() - b'A') * 2.5 / 60.0 + 1.25 / 60.0;
        (rest[2], rest[3], 2.5, 8)
    }
    else {
        let symbol = bytes.get(4..6)?;
        if !is_symbol_table(symbol[0]) || !symbol[1].is_ascii_graphic() || !ends_at(6) {
            return None;
        }
        longitude += 1.0;
        latitude += 0.5;
        (symbol[0], symbol[1], 60.0, 6)
    };

    let mut position = Position::new(latitude, longitude, symbol_table, symbol_code);
    position.horizontal_accuracy = Some(cell_height * METERS_PER_ARC_MINUTE);

    Some((position, body[text_start..].trim_start()))
}

fn is_symbol_table(byte: u8) -> bool {
    matches!(byte, b'/' | b'\\' | b'0'..=b'9' | b'A'..=b'Z')
}
