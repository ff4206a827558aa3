/// Parse a human-readable duration to a number of seconds.
///
/// A duration is an integer with an optional suffix:
/// no suffix or `s` seconds, `m` minutes, `h` hours, `d` days, `w` weeks,
/// `M` months (30.5 days), `y` years (365 days).
pub fn parse_duration(dur: &str) -> anyhow::Result<i64> {
    let Some(last) = dur.chars().last() else {
        anyhow::bail!("empty duration");
    };

    if last.is_ascii_digit() {
        return dur
            .parse::<i64>()
            .map_err(|e| anyhow::anyhow!("unable to parse duration {dur:?}: {e}"));
    }

    let factor: i64 = match last {
        's' => 1,
        'm' => 60,
        'h' => 3_600,
        'd' => 86_400,
        'w' => 604_800,
        'M' => 2_635_200,
        'y' => 31_536_000,
        _ => anyhow::bail!("unable to parse duration {dur:?}"),
    };

    let count = dur[..dur.len() - 1]
        .parse::<i64>()
        .map_err(|e| anyhow::anyhow!("unable to parse duration {dur:?}: {e}"))?;
    Ok(count * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalent_spellings() {
        assert_eq!(parse_duration("3600s").unwrap(), 3_600);
        assert_eq!(parse_duration("1h").unwrap(), 3_600);
        assert_eq!(parse_duration("60m").unwrap(), 3_600);
        assert_eq!(parse_duration("3600").unwrap(), 3_600);
    }

    #[test]
    fn all_suffixes() {
        assert_eq!(parse_duration("10").unwrap(), 10);
        assert_eq!(parse_duration("10s").unwrap(), 10);
        assert_eq!(parse_duration("2m").unwrap(), 120);
        assert_eq!(parse_duration("1d").unwrap(), 86_400);
        assert_eq!(parse_duration("2w").unwrap(), 1_209_600);
        assert_eq!(parse_duration("1M").unwrap(), 2_635_200);
        assert_eq!(parse_duration("10y").unwrap(), 315_360_000);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("x").is_err());
        assert!(parse_duration("10q").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("ten seconds").is_err());
    }
}
