use chrono::{DateTime, Datelike, FixedOffset, NaiveDate};
use serde::de::Error;
use serde::Deserialize;

/// Parses a text field, treating an empty value as absent.
pub fn nullable<'de, D, T, E>(de: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: std::str::FromStr<Err = E>,
    E: std::fmt::Display,
{
    let val = String::deserialize(de)?;
    let val = val.trim();
    if val.is_empty() {
        Ok(None)
    } else {
        val.parse()
            .map(Some)
            .map_err(|e: E| D::Error::custom(e.to_string()))
    }
}

/// Like [`nullable`] for decimals written with a comma separator.
pub fn nullable_decimal<'de, D>(de: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let val = String::deserialize(de)?;
    let val = val.trim();
    if val.is_empty() {
        Ok(None)
    } else {
        val.replacen(',', ".", 1)
            .parse()
            .map(Some)
            .map_err(D::Error::custom)
    }
}

/// Dates written as `YYYYMMDD`.
pub fn compact_date<'de, D>(de: D) -> Result<NaiveDate, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let val = String::deserialize(de)?;
    NaiveDate::parse_from_str(val.trim(), "%Y%m%d").map_err(D::Error::custom)
}

/// `O`/`N` and `true`/`false` flags; empty means unknown.
pub fn flag<'de, D>(de: D) -> Result<Option<bool>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let val = String::deserialize(de)?;
    match val.trim() {
        "" => Ok(None),
        "O" | "o" | "true" | "1" => Ok(Some(true)),
        "N" | "n" | "false" | "0" => Ok(Some(false)),
        other => Err(D::Error::custom(format!("invalid flag {:?}", other))),
    }
}

/// RFC 3339 timestamps reduced to their local calendar date. Exports write
/// `0001-01-01T00:00:00Z` for missing dates, so the first year reads as null.
pub fn nullable_date<'de, D>(de: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let val = Option::<DateTime<FixedOffset>>::deserialize(de)?;
    Ok(val
        .map(|timestamp| timestamp.date_naive())
        .filter(|date| date.year() > 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Row {
        #[serde(deserialize_with = "nullable")]
        count: Option<i64>,
        #[serde(deserialize_with = "nullable_decimal")]
        ratio: Option<f64>,
        #[serde(deserialize_with = "flag")]
        employer: Option<bool>,
    }

    #[derive(Deserialize)]
    struct Dated {
        #[serde(default, deserialize_with = "nullable_date")]
        date: Option<NaiveDate>,
    }

    #[test]
    fn empty_fields_are_null() {
        let row: Row =
            serde_json::from_str(r#"{"count": "", "ratio": "", "employer": ""}"#).unwrap();
        assert_eq!(row.count, None);
        assert_eq!(row.ratio, None);
        assert_eq!(row.employer, None);
    }

    #[test]
    fn decimals_accept_comma() {
        let row: Row =
            serde_json::from_str(r#"{"count": "42", "ratio": "1,5", "employer": "O"}"#).unwrap();
        assert_eq!(row.count, Some(42));
        assert_eq!(row.ratio, Some(1.5));
        assert_eq!(row.employer, Some(true));
    }

    #[test]
    fn zero_instant_is_null() {
        let dated: Dated = serde_json::from_str(r#"{"date": "0001-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(dated.date, None);
        let dated: Dated = serde_json::from_str(r#"{"date": null}"#).unwrap();
        assert_eq!(dated.date, None);
        let dated: Dated = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(dated.date, None);
        let dated: Dated =
            serde_json::from_str(r#"{"date": "2019-03-01T00:00:00+01:00"}"#).unwrap();
        assert_eq!(dated.date, NaiveDate::from_ymd_opt(2019, 3, 1));
    }
}
