//! Maidenhead locator helpers.
//!
//! WSPR positions are 4-character squares (2° × 1°) or 6-character
//! sub-squares (5' × 2.5'). Coordinates are returned at the cell center.

/// Sub-square width in degrees of longitude.
pub const SUBSQUARE_LON_DEG: f64 = 1.0 / 12.0;

/// Sub-square height in degrees of latitude.
pub const SUBSQUARE_LAT_DEG: f64 = 1.0 / 24.0;

/// Check that `locator` is a well-formed 4- or 6-character locator.
///
/// Field letters are `A`-`R`, square digits `0`-`9`, sub-square letters
/// `a`-`x`. Case is not significant.
pub fn is_valid(locator: &str) -> bool {
    let b = locator.as_bytes();
    if b.len() != 4 && b.len() != 6 {
        return false;
    }
    let field = |c: u8| matches!(c.to_ascii_uppercase(), b'A'..=b'R');
    let square = |c: u8| c.is_ascii_digit();
    let sub = |c: u8| matches!(c.to_ascii_lowercase(), b'a'..=b'x');

    field(b[0])
        && field(b[1])
        && square(b[2])
        && square(b[3])
        && (b.len() == 4 || (sub(b[4]) && sub(b[5])))
}

/// Canonical casing: `FN31` or `FN31pr`. Returns `None` if malformed.
pub fn normalize(locator: &str) -> Option<String> {
    if !is_valid(locator) {
        return None;
    }
    let mut out = locator[..4].to_ascii_uppercase();
    if locator.len() == 6 {
        out.push_str(&locator[4..].to_ascii_lowercase());
    }
    Some(out)
}

/// First four characters of a locator, upper-cased.
pub fn square(locator: &str) -> Option<String> {
    let head = locator.get(..4)?;
    normalize(head)
}

/// Append a sub-square index pair to a 4-character square.
pub fn with_subsquare(square: &str, lon_index: u8, lat_index: u8) -> Option<String> {
    if lon_index >= 24 || lat_index >= 24 {
        return None;
    }
    let mut out = normalize(square.get(..4)?)?;
    out.push((b'a' + lon_index) as char);
    out.push((b'a' + lat_index) as char);
    Some(out)
}

/// Convert a locator to the latitude/longitude of its center.
pub fn to_lat_lon(locator: &str) -> Option<(f64, f64)> {
    if !is_valid(locator) {
        return None;
    }
    let b: Vec<u8> = locator.bytes().collect();

    let mut lon = (b[0].to_ascii_uppercase() - b'A') as f64 * 20.0 - 180.0;
    let mut lat = (b[1].to_ascii_uppercase() - b'A') as f64 * 10.0 - 90.0;
    lon += (b[2] - b'0') as f64 * 2.0;
    lat += (b[3] - b'0') as f64;

    if b.len() == 6 {
        lon += (b[4].to_ascii_lowercase() - b'a') as f64 * SUBSQUARE_LON_DEG
            + SUBSQUARE_LON_DEG / 2.0;
        lat += (b[5].to_ascii_lowercase() - b'a') as f64 * SUBSQUARE_LAT_DEG
            + SUBSQUARE_LAT_DEG / 2.0;
    } else {
        lon += 1.0;
        lat += 0.5;
    }
    Some((lat, lon))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_validity() {
        assert!(is_valid("FN31"));
        assert!(is_valid("fn31pr"));
        assert!(is_valid("RR99xx"));
        assert!(!is_valid("SN31")); // field beyond R
        assert!(!is_valid("FN3"));
        assert!(!is_valid("FN31py1"));
        assert!(!is_valid("FN31yy")); // sub-square beyond x
        assert!(!is_valid("FNA1"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("fn31PR").as_deref(), Some("FN31pr"));
        assert_eq!(normalize("fn31").as_deref(), Some("FN31"));
        assert_eq!(normalize("XX00"), None);
    }

    #[test]
    fn test_square() {
        assert_eq!(square("fn31pr").as_deref(), Some("FN31"));
        assert_eq!(square("FN"), None);
    }

    #[test]
    fn test_grid4_center() {
        let (lat, lon) = to_lat_lon("FN31").unwrap();
        assert!(close(lat, 41.5));
        assert!(close(lon, -73.0));
    }

    #[test]
    fn test_grid6_center() {
        let (lat, lon) = to_lat_lon("FN31pr").unwrap();
        // p = 15, r = 17
        assert!(close(lon, -74.0 + 15.0 / 12.0 + 1.0 / 24.0));
        assert!(close(lat, 41.0 + 17.0 / 24.0 + 1.0 / 48.0));
    }

    #[test]
    fn test_with_subsquare() {
        assert_eq!(with_subsquare("FN31", 15, 17).as_deref(), Some("FN31pr"));
        assert_eq!(with_subsquare("FN31", 24, 0), None);
        assert_eq!(with_subsquare("ZZ99", 0, 0), None);
    }

    #[test]
    fn test_corner_cells() {
        let (lat, lon) = to_lat_lon("AA00aa").unwrap();
        assert!(lat > -90.0 && lat < -89.9);
        assert!(lon > -180.0 && lon < -179.9);
        let (lat, lon) = to_lat_lon("RR99xx").unwrap();
        assert!(lat < 90.0 && lat > 89.9);
        assert!(lon < 180.0 && lon > 179.9);
    }
}
