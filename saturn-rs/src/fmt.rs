//! Provides helpers to parse and format byte sizes and durations.
//!
//! Cache budgets and timeouts are most probably given in the config. Therefore these can either
//! be specified as plain numbers or as human readable expressions like "64m" or "5s".
use std::time::Duration;

use yaml_rust::Yaml;

const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

/// Formats a given size in bytes using the largest reasonable binary unit.
///
/// # Examples
///
/// ```
/// # use saturn::fmt::format_size;
/// assert_eq!(format_size(0), "0 bytes");
/// assert_eq!(format_size(1), "1 byte");
/// assert_eq!(format_size(630), "630 bytes");
/// assert_eq!(format_size(2048), "2.00 KiB");
/// assert_eq!(format_size(87_340), "85.3 KiB");
/// assert_eq!(format_size(873_400), "853 KiB");
/// assert_eq!(format_size(64 * 1024 * 1024), "64.0 MiB");
/// assert_eq!(format_size(8_734_000_000), "8.13 GiB");
/// ```
pub fn format_size(size_in_bytes: usize) -> String {
    match size_in_bytes {
        1 => return "1 byte".to_owned(),
        0..=1023 => return format!("{} bytes", size_in_bytes),
        _ => (),
    }

    let mut size = size_in_bytes as f64 / 1024.;
    let mut unit = 0;
    while size >= 1024. && unit < UNITS.len() - 1 {
        size /= 1024.;
        unit += 1;
    }

    if size < 10. {
        format!("{:.2} {}", size, UNITS[unit])
    } else if size < 100. {
        format!("{:.1} {}", size, UNITS[unit])
    } else {
        format!("{:.0} {}", size, UNITS[unit])
    }
}

/// Parses a size expression like "512", "2k" or "64 MB".
///
/// The optional suffix **k**, **m**, **g** or **t** (case insensitive, optionally followed by
/// "b") selects the binary unit. A plain "b" is accepted as well.
///
/// # Examples
///
/// ```
/// # use saturn::fmt::parse_size;
/// assert_eq!(parse_size("100").unwrap(), 100);
/// assert_eq!(parse_size("100b").unwrap(), 100);
/// assert_eq!(parse_size("2k").unwrap(), 2048);
/// assert_eq!(parse_size("64 MB").unwrap(), 64 * 1024 * 1024);
/// assert_eq!(parse_size("1g").unwrap(), 1 << 30);
///
/// assert_eq!(parse_size("3 Y").is_err(), true);
/// assert_eq!(parse_size("1.2g").is_err(), true);
/// assert_eq!(parse_size("-1").is_err(), true);
/// ```
pub fn parse_size(str: impl AsRef<str>) -> anyhow::Result<usize> {
    lazy_static::lazy_static! {
        static ref SIZE: regex::Regex =
            regex::Regex::new(r"^\s*(\d+)\s*(?i:([kmgt]?)b?)\s*$").unwrap();
    }

    let input = str.as_ref();
    let captures = SIZE.captures(input).ok_or_else(|| {
        anyhow::anyhow!(
            "Cannot parse '{}' into a size. Expected a positive number and optionally 'k', 'm', \
             'g' or 't' as suffix.",
            input
        )
    })?;

    let number = captures[1]
        .parse::<usize>()
        .map_err(|error| anyhow::anyhow!("Cannot parse '{}' into a size: {}", input, error))?;
    let shift = match captures[2].to_ascii_lowercase().as_str() {
        "k" => 10,
        "m" => 20,
        "g" => 30,
        "t" => 40,
        _ => 0,
    };

    // Terabytes exceed the address space of 32-bit targets...
    1usize
        .checked_shl(shift)
        .and_then(|factor| number.checked_mul(factor))
        .ok_or_else(|| anyhow::anyhow!("The size '{}' is too large.", input))
}

/// Parses a duration expression like "500ms", "5s" or "2 m".
///
/// Without suffix, the value is treated as milliseconds.
///
/// # Examples
///
/// ```
/// # use saturn::fmt::parse_duration;
/// # use std::time::Duration;
/// assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
/// assert_eq!(parse_duration("100 ms").unwrap(), Duration::from_millis(100));
/// assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
/// assert_eq!(parse_duration("2 M").unwrap(), Duration::from_secs(120));
/// assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
///
/// assert_eq!(parse_duration("3 Y").is_err(), true);
/// assert_eq!(parse_duration("-1s").is_err(), true);
/// ```
pub fn parse_duration(str: impl AsRef<str>) -> anyhow::Result<Duration> {
    lazy_static::lazy_static! {
        static ref DURATION: regex::Regex =
            regex::Regex::new(r"^\s*(\d+)\s*(?i:(ms|s|m|h)?)\s*$").unwrap();
    }

    let input = str.as_ref();
    let captures = DURATION.captures(input).ok_or_else(|| {
        anyhow::anyhow!(
            "Cannot parse '{}' into a duration. Expected a positive number and optionally 'ms', \
             's', 'm' or 'h' as suffix.",
            input
        )
    })?;

    let number = captures[1]
        .parse::<u64>()
        .map_err(|error| anyhow::anyhow!("Cannot parse '{}' into a duration: {}", input, error))?;
    let unit = captures
        .get(2)
        .map(|unit| unit.as_str().to_ascii_lowercase())
        .unwrap_or_default();

    Ok(match unit.as_str() {
        "s" => Duration::from_secs(number),
        "m" => Duration::from_secs(number * 60),
        "h" => Duration::from_secs(number * 60 * 60),
        _ => Duration::from_millis(number),
    })
}

/// Reads a size from a config value.
///
/// The value can either be an integer (bytes) or a size expression as accepted by
/// [parse_size]. If the value is absent, the given default is used.
///
/// # Examples
///
/// ```
/// # use saturn::fmt::size_setting;
/// # use yaml_rust::Yaml;
/// assert_eq!(size_setting(&Yaml::Integer(630), 0).unwrap(), 630);
/// assert_eq!(size_setting(&Yaml::String("2k".to_owned()), 0).unwrap(), 2048);
/// assert_eq!(size_setting(&Yaml::BadValue, 64).unwrap(), 64);
/// assert_eq!(size_setting(&Yaml::Integer(-1), 0).is_err(), true);
/// ```
pub fn size_setting(value: &Yaml, default: usize) -> anyhow::Result<usize> {
    match value {
        Yaml::Integer(size) => usize::try_from(*size)
            .map_err(|_| anyhow::anyhow!("A size must not be negative but {} was given.", size)),
        Yaml::String(size) => parse_size(size),
        Yaml::Null | Yaml::BadValue => Ok(default),
        other => Err(anyhow::anyhow!("Cannot read a size from {:?}.", other)),
    }
}

/// Reads a duration from a config value.
///
/// The value can either be an integer (milliseconds) or a duration expression as accepted by
/// [parse_duration]. If the value is absent, the given default is used.
///
/// # Examples
///
/// ```
/// # use saturn::fmt::duration_setting;
/// # use std::time::Duration;
/// # use yaml_rust::Yaml;
/// let default = Duration::from_secs(5);
/// let two_seconds = Yaml::String("2s".to_owned());
/// assert_eq!(
///     duration_setting(&Yaml::Integer(250), default).unwrap(),
///     Duration::from_millis(250)
/// );
/// assert_eq!(duration_setting(&two_seconds, default).unwrap(), Duration::from_secs(2));
/// assert_eq!(duration_setting(&Yaml::BadValue, default).unwrap(), default);
/// ```
pub fn duration_setting(value: &Yaml, default: Duration) -> anyhow::Result<Duration> {
    match value {
        Yaml::Integer(millis) => u64::try_from(*millis)
            .map(Duration::from_millis)
            .map_err(|_| {
                anyhow::anyhow!("A duration must not be negative but {} was given.", millis)
            }),
        Yaml::String(duration) => parse_duration(duration),
        Yaml::Null | Yaml::BadValue => Ok(default),
        other => Err(anyhow::anyhow!("Cannot read a duration from {:?}.", other)),
    }
}
