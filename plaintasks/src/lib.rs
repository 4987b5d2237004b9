//! Plain-text task list engine for editor plugins.
//!
//! Task lists are ordinary text: bullets mark open, done and cancelled items,
//! a header marker introduces outline sections, and a fixed separator line
//! followed by the archive title opens the archive. Nothing is cached between
//! calls; every command re-reads the lines it needs through [`document::Document`].

pub mod error {
    use std::path::PathBuf;

    #[derive(Debug, thiserror::Error)]
    pub enum ConfigError {
        #[error("`{0}` must not be empty")]
        EmptyField(&'static str),
        #[error("markers `{first}` and `{second}` are ambiguous: one is a prefix of the other")]
        AmbiguousMarkers { first: String, second: String },
        #[error("invalid date format `{0}`")]
        InvalidDateFormat(String),
        #[error("reading config {path:?}")]
        Io {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("invalid config: {0}")]
        Toml(#[from] toml::de::Error),
    }

    #[derive(Debug, thiserror::Error)]
    pub enum DocumentError {
        #[error("line {index} is out of range (document has {len} lines)")]
        LineOutOfRange { index: usize, len: usize },
    }
}

pub mod config {
    //! User settings and the localized tag vocabulary.
    //!
    //! Everything here is plain data. [`crate::classify::Vocabulary`] is the
    //! compiled form of the bullet settings and must be rebuilt whenever a new
    //! [`Config`] is installed.

    use crate::duration;
    use crate::error::ConfigError;
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::{fs, path::Path};

    /// Literal line that opens the archive section (19 x U+FF3F).
    pub const SEPARATOR: &str = "＿＿＿＿＿＿＿＿＿＿＿＿＿＿＿＿＿＿＿";

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Config {
        pub task_bullet_open: String,
        pub task_bullet_done: String,
        pub task_bullet_cancel: String,
        /// Prefix (after indentation) that turns a line into a project header.
        pub header_marker: String,
        /// Marker appended on completion; empty disables it.
        pub done_tag: String,
        /// Marker appended on cancellation; empty disables it.
        pub cancel_tag: String,
        pub add_created_tag: bool,
        /// Whether stamped tags carry `(date)`.
        pub done_date: bool,
        /// chrono strftime format of tag values, without the surrounding parentheses.
        pub date_format: String,
        /// Text placed between a line and every tag appended to it.
        pub space_before_tag: String,
        pub archive_name: String,
        pub markers: TagMarkers,
    }

    impl Default for Config {
        fn default() -> Self {
            Self {
                task_bullet_open: "☐".into(),
                task_bullet_done: "✔".into(),
                task_bullet_cancel: "✘".into(),
                header_marker: "#".into(),
                done_tag: "@done".into(),
                cancel_tag: "@canceled".into(),
                add_created_tag: false,
                done_date: true,
                date_format: "%y-%m-%d %H:%M".into(),
                space_before_tag: " ".into(),
                archive_name: "Archive:".into(),
                markers: TagMarkers::default(),
            }
        }
    }

    impl Config {
        /// Read, normalize and validate a TOML settings file.
        pub fn load(path: &Path) -> Result<Self, ConfigError> {
            let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_toml(&text)
        }

        pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
            let config: Config = toml::from_str(text)?;
            let config = config.normalized();
            config.validate()?;
            Ok(config)
        }

        /// Trims bullets and accepts date formats written as `(%y-%m-%d)`;
        /// the parentheses belong to the tag syntax, not to the date.
        pub fn normalized(mut self) -> Self {
            for field in [
                &mut self.task_bullet_open,
                &mut self.task_bullet_done,
                &mut self.task_bullet_cancel,
                &mut self.header_marker,
            ] {
                *field = field.trim().to_string();
            }
            self.archive_name = self.archive_name.trim().to_string();
            let format = self.date_format.trim();
            self.date_format = format
                .strip_prefix('(')
                .and_then(|f| f.strip_suffix(')'))
                .unwrap_or(format)
                .to_string();
            self
        }

        /// Bullets and the header marker must be non-empty and pairwise
        /// non-prefixing, otherwise classification would depend on match order.
        pub fn validate(&self) -> Result<(), ConfigError> {
            let markers: [(&'static str, &str); 4] = [
                ("task_bullet_open", self.task_bullet_open.as_str()),
                ("task_bullet_done", self.task_bullet_done.as_str()),
                ("task_bullet_cancel", self.task_bullet_cancel.as_str()),
                ("header_marker", self.header_marker.as_str()),
            ];
            for (name, value) in markers {
                if value.trim().is_empty() {
                    return Err(ConfigError::EmptyField(name));
                }
            }
            for (i, (_, first)) in markers.iter().enumerate() {
                for (_, second) in &markers[i + 1..] {
                    if first.starts_with(second) || second.starts_with(first) {
                        return Err(ConfigError::AmbiguousMarkers {
                            first: first.to_string(),
                            second: second.to_string(),
                        });
                    }
                }
            }
            if self.archive_name.trim().is_empty() {
                return Err(ConfigError::EmptyField("archive_name"));
            }
            if !duration::is_valid_format(&self.date_format) {
                return Err(ConfigError::InvalidDateFormat(self.date_format.clone()));
            }
            Ok(())
        }
    }

    /* ------------------------------ Tag markers ------------------------------ */

    /// Canonical tags whose display text can be localized.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum TagKind {
        Started,
        Toggle,
        Created,
        Lasted,
        Wasted,
        Project,
    }

    impl TagKind {
        pub const ALL: [TagKind; 6] = [
            TagKind::Started,
            TagKind::Toggle,
            TagKind::Created,
            TagKind::Lasted,
            TagKind::Wasted,
            TagKind::Project,
        ];

        pub fn name(self) -> &'static str {
            match self {
                TagKind::Started => "started",
                TagKind::Toggle => "toggle",
                TagKind::Created => "created",
                TagKind::Lasted => "lasted",
                TagKind::Wasted => "wasted",
                TagKind::Project => "project",
            }
        }

        pub fn default_marker(self) -> &'static str {
            match self {
                TagKind::Started => "@started",
                TagKind::Toggle => "@toggle",
                TagKind::Created => "@created",
                TagKind::Lasted => "@lasted",
                TagKind::Wasted => "@wasted",
                TagKind::Project => "@project",
            }
        }
    }

    /// Canonical tag name -> marker text, e.g. `started = "@begonnen"`.
    ///
    /// Missing or empty entries fall back to the English marker, so a partial
    /// `[markers]` table only overrides what it names.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TagMarkers(IndexMap<String, String>);

    impl Default for TagMarkers {
        fn default() -> Self {
            Self(
                TagKind::ALL
                    .iter()
                    .map(|k| (k.name().to_string(), k.default_marker().to_string()))
                    .collect(),
            )
        }
    }

    impl TagMarkers {
        pub fn get(&self, kind: TagKind) -> &str {
            self.0
                .get(kind.name())
                .map(String::as_str)
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(kind.default_marker())
        }

        pub fn set(&mut self, kind: TagKind, marker: impl Into<String>) {
            self.0.insert(kind.name().to_string(), marker.into());
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn defaults_are_valid() {
            Config::default().validate().expect("default config");
        }

        #[test]
        fn prefixing_bullets_are_rejected() {
            let config = Config {
                task_bullet_open: "-".into(),
                task_bullet_done: "-x".into(),
                ..Config::default()
            };
            match config.validate() {
                Err(ConfigError::AmbiguousMarkers { first, second }) => {
                    assert_eq!(first, "-");
                    assert_eq!(second, "-x");
                }
                other => panic!("expected ambiguity error, got {:?}", other),
            }
        }

        #[test]
        fn header_marker_takes_part_in_ambiguity_check() {
            let config = Config {
                header_marker: "☐☐".into(),
                ..Config::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::AmbiguousMarkers { .. })
            ));
        }

        #[test]
        fn empty_bullet_is_rejected() {
            let config = Config {
                task_bullet_cancel: "  ".into(),
                ..Config::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::EmptyField("task_bullet_cancel"))
            ));
        }

        #[test]
        fn toml_overrides_merge_with_defaults() {
            let config = Config::from_toml(
                r#"
task_bullet_open = "-"
task_bullet_done = "+"
task_bullet_cancel = "x"
date_format = "(%Y-%m-%d)"

[markers]
lasted = "@gedauert"
"#,
            )
            .expect("parse");
            assert_eq!(config.task_bullet_open, "-");
            assert_eq!(config.date_format, "%Y-%m-%d");
            assert_eq!(config.archive_name, "Archive:");
            assert_eq!(config.markers.get(TagKind::Lasted), "@gedauert");
            assert_eq!(config.markers.get(TagKind::Started), "@started");
        }

        #[test]
        fn broken_date_format_is_rejected() {
            let err = Config::from_toml("date_format = \"%Y-%\"\n").unwrap_err();
            assert!(matches!(err, ConfigError::InvalidDateFormat(_)));
        }

        #[test]
        fn offset_date_format_is_rejected() {
            let config = Config {
                date_format: "%Y-%m-%d %z".into(),
                ..Config::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidDateFormat(f)) if f == "%Y-%m-%d %z"
            ));
        }

        #[test]
        fn archive_name_is_trimmed() {
            let config = Config::from_toml("archive_name = \"Done:  \"\n").expect("parse");
            assert_eq!(config.archive_name, "Done:");
        }

        #[test]
        fn load_reports_missing_file() {
            let err = Config::load(Path::new("/definitely/not/here.toml")).unwrap_err();
            assert!(matches!(err, ConfigError::Io { .. }));
        }
    }
}

pub mod classify {
    //! Line classification. Total over all strings: anything unrecognized is
    //! [`LineKind::Plain`].

    use crate::config::{Config, SEPARATOR};
    use crate::error::ConfigError;
    use serde::Serialize;
    use std::ops::Range;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum LineKind {
        ItemOpen,
        ItemDone,
        ItemCancel,
        Header,
        Separator,
        Plain,
    }

    impl LineKind {
        pub fn is_item(self) -> bool {
            matches!(
                self,
                LineKind::ItemOpen | LineKind::ItemDone | LineKind::ItemCancel
            )
        }

        /// Done or cancelled: eligible for archiving.
        pub fn is_closed(self) -> bool {
            matches!(self, LineKind::ItemDone | LineKind::ItemCancel)
        }
    }

    /// Compiled bullet and header vocabulary.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Vocabulary {
        open: String,
        done: String,
        cancel: String,
        header: String,
    }

    impl Vocabulary {
        pub fn new(config: &Config) -> Result<Self, ConfigError> {
            config.validate()?;
            Ok(Self {
                open: config.task_bullet_open.clone(),
                done: config.task_bullet_done.clone(),
                cancel: config.task_bullet_cancel.clone(),
                header: config.header_marker.clone(),
            })
        }

        pub fn bullet(&self, kind: LineKind) -> Option<&str> {
            match kind {
                LineKind::ItemOpen => Some(&self.open),
                LineKind::ItemDone => Some(&self.done),
                LineKind::ItemCancel => Some(&self.cancel),
                _ => None,
            }
        }

        pub fn classify(&self, line: &str) -> LineKind {
            if is_separator(line) {
                return LineKind::Separator;
            }
            if line.trim_start().starts_with(self.header.as_str()) {
                return LineKind::Header;
            }
            self.bullet_span(line)
                .map(|(kind, _)| kind)
                .unwrap_or(LineKind::Plain)
        }

        /// Item kind and byte range of the bullet, anchored at the first
        /// non-whitespace character. Checked in the order done, cancel, open.
        pub fn bullet_span(&self, line: &str) -> Option<(LineKind, Range<usize>)> {
            let start = leading_whitespace(line).len();
            let rest = &line[start..];
            [
                (LineKind::ItemDone, self.done.as_str()),
                (LineKind::ItemCancel, self.cancel.as_str()),
                (LineKind::ItemOpen, self.open.as_str()),
            ]
            .into_iter()
            .find(|(_, bullet)| rest.starts_with(bullet))
            .map(|(kind, bullet)| (kind, start..start + bullet.len()))
        }

        /// Replaces the item bullet with the one for `to`; `None` if `line` is
        /// not an item or `to` is not an item kind.
        pub fn swap_bullet(&self, line: &str, to: LineKind) -> Option<String> {
            let bullet = self.bullet(to)?;
            let (_, range) = self.bullet_span(line)?;
            let mut out = String::with_capacity(line.len() + bullet.len());
            out.push_str(&line[..range.start]);
            out.push_str(bullet);
            out.push_str(&line[range.end..]);
            Some(out)
        }

        pub fn header_title<'a>(&self, line: &'a str) -> Option<&'a str> {
            line.trim_start()
                .strip_prefix(self.header.as_str())
                .map(str::trim)
        }
    }

    pub fn is_separator(line: &str) -> bool {
        line.trim() == SEPARATOR
    }

    pub fn leading_whitespace(line: &str) -> &str {
        &line[..line.len() - line.trim_start().len()]
    }

    /// Width of the leading whitespace, each tab counted as `tab_size` columns.
    pub fn indentation(line: &str, tab_size: usize) -> usize {
        leading_whitespace(line)
            .chars()
            .map(|c| if c == '\t' { tab_size } else { 1 })
            .sum()
    }

}

pub mod tags {
    //! Inline `@name` / `@name(value)` annotations.
    //!
    //! Markers are matched literally, so localized markers must be passed in
    //! exactly as the document spells them.

    use crate::config::{TagKind, TagMarkers};
    use crate::duration::parse_date;
    use chrono::NaiveDateTime;
    use nom::{
        IResult,
        bytes::complete::{tag, take_until},
        character::complete::char,
        combinator::opt,
        error::{Error, ErrorKind},
        sequence::delimited,
    };
    use std::ops::Range;

    type PResult<'a, T> = IResult<&'a str, T>;

    /// One occurrence of a marker, with its parenthesized value if any.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TagMatch<'a> {
        pub range: Range<usize>,
        pub value: Option<&'a str>,
    }

    fn is_word_char(c: char) -> bool {
        c.is_alphanumeric() || c == '_'
    }

    fn tag_value(i: &str) -> PResult<'_, &str> {
        delimited(char('('), take_until(")"), char(')'))(i)
    }

    fn occurrence<'a>(i: &'a str, marker: &str) -> PResult<'a, Option<&'a str>> {
        let (i, _) = tag(marker)(i)?;
        if i.chars().next().is_some_and(is_word_char) {
            return Err(nom::Err::Error(Error::new(i, ErrorKind::Verify)));
        }
        opt(tag_value)(i)
    }

    /// All occurrences of `marker` in left-to-right order.
    pub fn find_all<'a>(line: &'a str, marker: &str) -> Vec<TagMatch<'a>> {
        let mut out = Vec::new();
        if marker.is_empty() {
            return out;
        }
        let mut from = 0;
        while let Some(offset) = line[from..].find(marker) {
            let start = from + offset;
            // `@done` may sit right after a word; `done:` may not
            let at_boundary = !marker.starts_with(is_word_char)
                || line[..start]
                    .chars()
                    .next_back()
                    .is_none_or(|c| !is_word_char(c));
            match occurrence(&line[start..], marker) {
                Ok((rest, value)) if at_boundary => {
                    let end = line.len() - rest.len();
                    out.push(TagMatch {
                        range: start..end,
                        value,
                    });
                    from = end;
                }
                _ => from = start + marker.len(),
            }
        }
        out
    }

    pub fn has(line: &str, marker: &str) -> bool {
        !find_all(line, marker).is_empty()
    }

    /// Value of the first occurrence; `None` when absent or bare.
    pub fn get<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
        find_all(line, marker).into_iter().next()?.value
    }

    pub fn get_all<'a>(line: &'a str, marker: &str) -> Vec<&'a str> {
        find_all(line, marker)
            .into_iter()
            .filter_map(|m| m.value)
            .collect()
    }

    /// Deletes every occurrence of `marker` (with its value). The whitespace
    /// run before it goes too; a tag that opens the text takes the whitespace
    /// after it instead, so indentation survives.
    pub fn remove(line: &str, marker: &str) -> String {
        let matches = find_all(line, marker);
        if matches.is_empty() {
            return line.to_string();
        }
        let mut out = String::with_capacity(line.len());
        let mut cursor = 0;
        for m in matches {
            if m.range.start < cursor {
                continue;
            }
            let head = &line[cursor..m.range.start];
            let trimmed = head.trim_end();
            let mut end = m.range.end;
            if trimmed.len() < head.len() && !line[..m.range.start].trim().is_empty() {
                out.push_str(trimmed);
            } else {
                out.push_str(head);
                let tail = &line[end..];
                end += tail.len() - tail.trim_start().len();
            }
            cursor = end;
        }
        out.push_str(&line[cursor..]);
        out
    }

    pub fn append(line: &str, spacer: &str, text: &str) -> String {
        let mut out = String::with_capacity(line.len() + spacer.len() + text.len());
        out.push_str(line);
        out.push_str(spacer);
        out.push_str(text);
        out
    }

    pub fn with_value(marker: &str, value: &str) -> String {
        format!("{marker}({value})")
    }

    /* ----------------------------- Date accessors ----------------------------- */

    pub fn started_date(line: &str, markers: &TagMarkers, format: &str) -> Option<NaiveDateTime> {
        get(line, markers.get(TagKind::Started)).and_then(|v| parse_date(v, format))
    }

    pub fn created_date(line: &str, markers: &TagMarkers, format: &str) -> Option<NaiveDateTime> {
        get(line, markers.get(TagKind::Created)).and_then(|v| parse_date(v, format))
    }

    /// Parsed `toggle` dates in document order; unparsable values are skipped.
    pub fn toggle_dates(line: &str, markers: &TagMarkers, format: &str) -> Vec<NaiveDateTime> {
        get_all(line, markers.get(TagKind::Toggle))
            .into_iter()
            .filter_map(|v| parse_date(v, format))
            .collect()
    }

}

pub mod duration {
    //! Date parsing/formatting in the configured format and elapsed-time arithmetic.

    use chrono::{
        Duration, NaiveDate, NaiveDateTime,
        format::{Item, StrftimeItems},
    };
    use std::fmt::Write;

    /// The format must render a naive timestamp and read its own output back.
    pub fn is_valid_format(format: &str) -> bool {
        if format.trim().is_empty()
            || StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
        {
            return false;
        }
        let Some(sample) = NaiveDate::from_ymd_opt(2024, 3, 9).and_then(|d| d.and_hms_opt(14, 5, 0)) else {
            return false;
        };
        format_date(sample, format).is_some_and(|text| parse_date(&text, format).is_some())
    }

    /// Parses a tag value; date-only formats resolve to midnight.
    pub fn parse_date(value: &str, format: &str) -> Option<NaiveDateTime> {
        let value = value.trim();
        NaiveDateTime::parse_from_str(value, format).ok().or_else(|| {
            NaiveDate::parse_from_str(value, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
    }

    /// `None` when `format` asks for data a naive timestamp lacks, e.g. `%z`.
    pub fn format_date(at: NaiveDateTime, format: &str) -> Option<String> {
        let mut out = String::new();
        write!(out, "{}", at.format(format)).ok()?;
        Some(out)
    }

    /// Drops whatever precision `format` cannot express.
    pub fn truncate(at: NaiveDateTime, format: &str) -> NaiveDateTime {
        format_date(at, format)
            .and_then(|text| parse_date(&text, format))
            .unwrap_or(at)
    }

    /// Working time between `start` and `now`.
    ///
    /// Toggles alternate pause/resume starting from "running" at `start`, so
    /// `[start, t0)` runs, `[t0, t1)` is paused, and so on. An odd number of
    /// toggles means the task is paused now and the open interval is not
    /// counted. Intervals in the wrong order count as zero. `None` when
    /// `start` does not parse.
    pub fn elapsed(start: &str, toggles: &[&str], now: NaiveDateTime, format: &str) -> Option<Duration> {
        let start = parse_date(start, format)?;
        let mut points = vec![start];
        points.extend(toggles.iter().filter_map(|t| parse_date(t, format)));
        if points.len() % 2 == 1 {
            points.push(truncate(now, format));
        }
        Some(
            points
                .chunks_exact(2)
                .map(|pair| (pair[1] - pair[0]).max(Duration::zero()))
                .fold(Duration::zero(), |acc, d| acc + d),
        )
    }

    /// `2 days`, `1 day, 3:05` or `0:45`.
    pub fn format_duration(delta: Duration) -> String {
        let minutes = delta.num_minutes().max(0);
        let days = minutes / (24 * 60);
        let hours = (minutes / 60) % 24;
        let mins = minutes % 60;
        let day_part = match days {
            0 => None,
            1 => Some("1 day".to_string()),
            n => Some(format!("{n} days")),
        };
        match (day_part, hours, mins) {
            (Some(d), 0, 0) => d,
            (Some(d), h, m) => format!("{d}, {h}:{m:02}"),
            (None, h, m) => format!("{h}:{m:02}"),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const DAY: &str = "%Y-%m-%d";

        fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, min, 0)
                .unwrap()
        }

        #[test]
        fn no_toggles_runs_until_now() {
            let got = elapsed("2024-01-01", &[], at(2024, 1, 3, 0, 0), DAY);
            assert_eq!(got, Some(Duration::days(2)));
        }

        #[test]
        fn now_is_truncated_to_format_precision() {
            let got = elapsed("2024-01-01", &[], at(2024, 1, 3, 17, 45), DAY);
            assert_eq!(got, Some(Duration::days(2)));
        }

        #[test]
        fn zero_length_pause_contributes_nothing() {
            let got = elapsed(
                "2024-01-01",
                &["2024-01-02", "2024-01-02"],
                at(2024, 1, 3, 0, 0),
                DAY,
            );
            assert_eq!(got, Some(Duration::days(2)));
        }

        #[test]
        fn odd_toggles_mean_paused_now() {
            let got = elapsed("2024-01-01", &["2024-01-02"], at(2024, 1, 9, 0, 0), DAY);
            assert_eq!(got, Some(Duration::days(1)));
        }

        #[test]
        fn pauses_are_subtracted() {
            let fmt = "%y-%m-%d %H:%M";
            let got = elapsed(
                "24-01-01 09:00",
                &["24-01-01 12:00", "24-01-01 13:00"],
                at(2024, 1, 1, 17, 30),
                fmt,
            );
            assert_eq!(got, Some(Duration::minutes(7 * 60 + 30)));
        }

        #[test]
        fn out_of_order_toggles_clamp_to_zero() {
            let got = elapsed("2024-01-05", &["2024-01-01"], at(2024, 1, 9, 0, 0), DAY);
            assert_eq!(got, Some(Duration::zero()));
        }

        #[test]
        fn unparsable_start_yields_none() {
            assert_eq!(elapsed("someday", &[], at(2024, 1, 3, 0, 0), DAY), None);
        }

        #[test]
        fn durations_render_compactly() {
            assert_eq!(format_duration(Duration::days(2)), "2 days");
            assert_eq!(format_duration(Duration::minutes(24 * 60 + 185)), "1 day, 3:05");
            assert_eq!(format_duration(Duration::minutes(45)), "0:45");
            assert_eq!(format_duration(Duration::minutes(-5)), "0:00");
        }

        #[test]
        fn format_validation() {
            assert!(is_valid_format("%y-%m-%d %H:%M"));
            assert!(!is_valid_format("%Q"));
            assert!(!is_valid_format(""));
        }

        #[test]
        fn formats_needing_an_offset_are_rejected() {
            assert!(!is_valid_format("%Y-%m-%d %z"));
            assert!(!is_valid_format("%Y-%m-%d %Z"));
            let sample = at(2024, 1, 3, 9, 0);
            assert_eq!(format_date(sample, "%Y-%m-%d %z"), None);
            assert_eq!(format_date(sample, "%Y-%m-%d").as_deref(), Some("2024-01-03"));
        }

        #[test]
        fn formats_that_cannot_be_read_back_are_rejected() {
            assert!(!is_valid_format("%H:%M"));
            assert!(!is_valid_format("week %W"));
            assert!(is_valid_format("%d.%m.%Y"));
        }
    }
}

pub mod outline {
    //! The document as an implicit indentation tree, walked with linear scans.

    use crate::classify::{LineKind, Vocabulary, indentation};
    use serde::Serialize;
    use std::ops::Range;

    pub const PROJECT_SEPARATOR: &str = " / ";

    /// Headers enclosing `position`, shallowest first, as `(title, level)`.
    ///
    /// Scans upward keeping a ceiling that starts at the line's own level;
    /// every header strictly shallower than the ceiling is recorded and
    /// lowers it. Empty for lines at level 0.
    pub fn ancestor_path<S: AsRef<str>>(
        lines: &[S],
        position: usize,
        vocab: &Vocabulary,
        tab_size: usize,
    ) -> Vec<(String, usize)> {
        let Some(line) = lines.get(position) else {
            return vec![];
        };
        let mut ceiling = indentation(line.as_ref(), tab_size);
        let mut path = Vec::new();
        let mut n = position;
        while ceiling > 0 && n > 0 {
            n -= 1;
            let line = lines[n].as_ref();
            if vocab.classify(line) != LineKind::Header {
                continue;
            }
            let level = indentation(line, tab_size);
            if level < ceiling {
                if let Some(title) = vocab.header_title(line) {
                    path.push((title.to_string(), level));
                }
                ceiling = level;
            }
        }
        path.reverse();
        path
    }

    pub fn project_path<S: AsRef<str>>(
        lines: &[S],
        position: usize,
        vocab: &Vocabulary,
        tab_size: usize,
    ) -> String {
        ancestor_path(lines, position, vocab, tab_size)
            .into_iter()
            .map(|(title, _)| title)
            .collect::<Vec<_>>()
            .join(PROJECT_SEPARATOR)
    }

    /// Plain lines following `start` that are indented deeper than it,
    /// stopping at the first other line or at `boundary`.
    pub fn subtree<S: AsRef<str>>(
        lines: &[S],
        start: usize,
        boundary: usize,
        vocab: &Vocabulary,
        tab_size: usize,
    ) -> Range<usize> {
        let begin = start + 1;
        let Some(top) = lines.get(start) else {
            return begin..begin;
        };
        let base = indentation(top.as_ref(), tab_size);
        let limit = boundary.min(lines.len());
        let mut end = begin;
        while end < limit {
            let line = lines[end].as_ref();
            if vocab.classify(line) != LineKind::Plain || indentation(line, tab_size) <= base {
                break;
            }
            end += 1;
        }
        begin..end.max(begin)
    }

    /* ------------------------------ Line report ------------------------------ */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct LineInfo {
        pub index: usize,
        pub kind: LineKind,
        pub level: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub title: Option<String>,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub project: String,
    }

    pub fn describe<S: AsRef<str>>(lines: &[S], vocab: &Vocabulary, tab_size: usize) -> Vec<LineInfo> {
        lines
            .iter()
            .enumerate()
            .map(|(index, line)| {
                let line = line.as_ref();
                let kind = vocab.classify(line);
                LineInfo {
                    index,
                    kind,
                    level: indentation(line, tab_size),
                    title: (kind == LineKind::Header)
                        .then(|| vocab.header_title(line).map(str::to_string))
                        .flatten(),
                    project: project_path(lines, index, vocab, tab_size),
                }
            })
            .collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::config::Config;

        fn vocab() -> Vocabulary {
            Vocabulary::new(&Config::default()).expect("vocabulary")
        }

        const DOC: &[&str] = &[
            "# Home",
            "  # Kitchen",
            "    ☐ fix tap",
            "  # Garden",
            "    # Shed",
            "      ✔ paint door",
            "        primer first",
            "        two coats",
            "      ☐ oil hinges",
            "    ✘ mow",
            "top level note",
        ];

        #[test]
        fn level_zero_has_no_ancestors() {
            let v = vocab();
            assert!(ancestor_path(DOC, 0, &v, 4).is_empty());
            assert!(ancestor_path(DOC, 10, &v, 4).is_empty());
            assert_eq!(project_path(DOC, 10, &v, 4), "");
        }

        #[test]
        fn ancestors_skip_siblings_and_deeper_headers() {
            let v = vocab();
            assert_eq!(
                ancestor_path(DOC, 5, &v, 4),
                vec![
                    ("Home".to_string(), 0),
                    ("Garden".to_string(), 2),
                    ("Shed".to_string(), 4)
                ]
            );
            assert_eq!(project_path(DOC, 9, &v, 4), "Home / Garden");
            assert_eq!(project_path(DOC, 2, &v, 4), "Home / Kitchen");
        }

        #[test]
        fn subtree_collects_deeper_plain_lines_only() {
            let v = vocab();
            assert_eq!(subtree(DOC, 5, DOC.len(), &v, 4), 6..8);
            assert_eq!(subtree(DOC, 2, DOC.len(), &v, 4), 3..3);
            assert_eq!(subtree(DOC, 5, 7, &v, 4), 6..7);
        }

        #[test]
        fn tabs_and_spaces_share_one_scale() {
            let v = vocab();
            let lines = ["# A", "\t# B", "\t\t✔ x", "        keep"];
            assert_eq!(project_path(&lines, 2, &v, 4), "A / B");
            assert_eq!(subtree(&lines, 2, lines.len(), &v, 4), 3..3);
            assert_eq!(subtree(&lines, 2, lines.len(), &v, 2), 3..4);
        }

        #[test]
        fn describe_reports_titles_and_projects() {
            let v = vocab();
            let report = describe(DOC, &v, 4);
            assert_eq!(report[1].kind, LineKind::Header);
            assert_eq!(report[1].title.as_deref(), Some("Kitchen"));
            assert_eq!(report[8].kind, LineKind::ItemOpen);
            assert_eq!(report[8].project, "Home / Garden / Shed");
        }
    }
}

pub mod document {
    //! The host editor seen through a narrow line-oriented capability.

    use crate::error::DocumentError;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
    pub struct Position {
        pub line: usize,
        pub column: usize,
    }

    impl Position {
        pub fn new(line: usize, column: usize) -> Self {
            Self { line, column }
        }
    }

    /// Caret or selection; `head == None` means a bare caret at `anchor`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Selection {
        pub anchor: Position,
        pub head: Option<Position>,
    }

    impl Selection {
        pub fn caret(line: usize, column: usize) -> Self {
            Self {
                anchor: Position::new(line, column),
                head: None,
            }
        }

        pub fn range(anchor: Position, head: Position) -> Self {
            Self {
                anchor,
                head: Some(head),
            }
        }

        /// Whole rows `first..=last`.
        pub fn rows_between(first: usize, last: usize) -> Self {
            if first == last {
                Self::caret(first, 0)
            } else {
                Self::range(Position::new(first, 0), Position::new(last, usize::MAX))
            }
        }

        /// True when the caret covers a single line.
        pub fn is_single_line(&self) -> bool {
            self.head.is_none_or(|h| h.line == self.anchor.line)
        }

        /// Inclusive row range. A selection that ends at column 0 of a later
        /// row does not include that row.
        pub fn rows(&self) -> (usize, usize) {
            let Some(head) = self.head else {
                return (self.anchor.line, self.anchor.line);
            };
            let (first, last) = if self.anchor > head {
                (head, self.anchor)
            } else {
                (self.anchor, head)
            };
            let mut end = last.line;
            if last.column == 0 && end > first.line {
                end -= 1;
            }
            (first.line, end)
        }
    }

    pub trait Document {
        fn line_count(&self) -> usize;
        fn line(&self, index: usize) -> Result<String, DocumentError>;
        fn set_line(&mut self, index: usize, text: &str) -> Result<(), DocumentError>;
        /// Inserts before `index`; `index == line_count()` appends.
        fn insert_line(&mut self, index: usize, text: &str) -> Result<(), DocumentError>;
        fn delete_line(&mut self, index: usize) -> Result<(), DocumentError>;
        fn selection(&self) -> Selection;
        fn set_caret(&mut self, position: Position);
        fn tab_size(&self) -> usize;
        /// One level of indentation as the host would type it.
        fn indent_unit(&self) -> String;

        fn append_line(&mut self, text: &str) -> Result<(), DocumentError> {
            let end = self.line_count();
            self.insert_line(end, text)
        }

        fn snapshot(&self) -> Result<Vec<String>, DocumentError> {
            (0..self.line_count()).map(|i| self.line(i)).collect()
        }
    }

    /* ----------------------------- In-memory text ----------------------------- */

    /// A `Document` over an owned string, used by the CLI and in tests.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TextDocument {
        lines: Vec<String>,
        line_ending: &'static str,
        trailing_newline: bool,
        selection: Selection,
        tab_size: usize,
        tabs_as_spaces: bool,
    }

    impl TextDocument {
        pub fn from_text(text: &str) -> Self {
            let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
            if lines.is_empty() {
                lines.push(String::new());
            }
            // the first line break decides for the whole file
            let line_ending = match text.find('\n') {
                Some(i) if text[..i].ends_with('\r') => "\r\n",
                _ => "\n",
            };
            Self {
                lines,
                line_ending,
                trailing_newline: text.ends_with('\n'),
                selection: Selection::default(),
                tab_size: 4,
                tabs_as_spaces: true,
            }
        }

        pub fn with_indent(mut self, tab_size: usize, tabs_as_spaces: bool) -> Self {
            self.tab_size = tab_size.max(1);
            self.tabs_as_spaces = tabs_as_spaces;
            self
        }

        pub fn with_selection(mut self, selection: Selection) -> Self {
            self.selection = selection;
            self
        }

        pub fn set_selection(&mut self, selection: Selection) {
            self.selection = selection;
        }

        pub fn lines(&self) -> &[String] {
            &self.lines
        }

        pub fn text(&self) -> String {
            let mut out = self.lines.join(self.line_ending);
            if self.trailing_newline {
                out.push_str(self.line_ending);
            }
            out
        }

        fn check(&self, index: usize, len: usize) -> Result<(), DocumentError> {
            if index < len {
                Ok(())
            } else {
                Err(DocumentError::LineOutOfRange {
                    index,
                    len: self.lines.len(),
                })
            }
        }
    }

    impl Document for TextDocument {
        fn line_count(&self) -> usize {
            self.lines.len()
        }

        fn line(&self, index: usize) -> Result<String, DocumentError> {
            self.check(index, self.lines.len())?;
            Ok(self.lines[index].clone())
        }

        fn set_line(&mut self, index: usize, text: &str) -> Result<(), DocumentError> {
            self.check(index, self.lines.len())?;
            self.lines[index] = text.to_string();
            Ok(())
        }

        fn insert_line(&mut self, index: usize, text: &str) -> Result<(), DocumentError> {
            self.check(index, self.lines.len() + 1)?;
            self.lines.insert(index, text.to_string());
            Ok(())
        }

        fn delete_line(&mut self, index: usize) -> Result<(), DocumentError> {
            self.check(index, self.lines.len())?;
            self.lines.remove(index);
            if self.lines.is_empty() {
                self.lines.push(String::new());
            }
            Ok(())
        }

        fn selection(&self) -> Selection {
            self.selection
        }

        fn set_caret(&mut self, position: Position) {
            self.selection = Selection::caret(position.line, position.column);
        }

        fn tab_size(&self) -> usize {
            self.tab_size
        }

        fn indent_unit(&self) -> String {
            if self.tabs_as_spaces {
                " ".repeat(self.tab_size)
            } else {
                "\t".to_string()
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn caret_selects_one_row() {
            assert_eq!(Selection::caret(7, 3).rows(), (7, 7));
        }

        #[test]
        fn reversed_selection_is_normalized() {
            let sel = Selection::range(Position::new(9, 2), Position::new(4, 5));
            assert_eq!(sel.rows(), (4, 9));
        }

        #[test]
        fn column_zero_end_excludes_last_row() {
            let sel = Selection::range(Position::new(2, 1), Position::new(5, 0));
            assert_eq!(sel.rows(), (2, 4));
            let same_row = Selection::range(Position::new(2, 0), Position::new(2, 0));
            assert_eq!(same_row.rows(), (2, 2));
            assert_eq!(Selection::rows_between(3, 6).rows(), (3, 6));
        }

        #[test]
        fn text_round_trips_trailing_newline() {
            let doc = TextDocument::from_text("a\nb\n");
            assert_eq!(doc.lines(), ["a", "b"]);
            assert_eq!(doc.text(), "a\nb\n");
            assert_eq!(TextDocument::from_text("a").text(), "a");
        }

        #[test]
        fn crlf_line_endings_survive_edits() {
            let mut doc = TextDocument::from_text("☐ a\r\n☐ b\r\n");
            assert_eq!(doc.lines(), ["☐ a", "☐ b"]);
            assert_eq!(doc.text(), "☐ a\r\n☐ b\r\n");
            doc.insert_line(1, "☐ new").expect("insert");
            assert_eq!(doc.text(), "☐ a\r\n☐ new\r\n☐ b\r\n");
            assert_eq!(TextDocument::from_text("x\r\ny").text(), "x\r\ny");
        }

        #[test]
        fn edits_are_bounds_checked() {
            let mut doc = TextDocument::from_text("a\nb");
            assert!(doc.line(2).is_err());
            doc.insert_line(2, "c").expect("append position is valid");
            assert!(doc.insert_line(4, "x").is_err());
            doc.delete_line(0).expect("delete");
            assert_eq!(doc.text(), "b\nc");
            assert!(matches!(
                doc.set_line(5, "x"),
                Err(DocumentError::LineOutOfRange { index: 5, len: 2 })
            ));
        }

        #[test]
        fn indent_unit_follows_tab_settings() {
            let doc = TextDocument::from_text("");
            assert_eq!(doc.clone().with_indent(2, true).indent_unit(), "  ");
            assert_eq!(doc.with_indent(4, false).indent_unit(), "\t");
        }
    }
}

pub mod archive {
    //! Moves done and cancelled items, with their notes, under the archive title.
    //!
    //! Planning runs on a snapshot so project paths are taken from the items'
    //! positions before the move; [`apply`] then performs the edits on a `Document`.

    use crate::classify::{Vocabulary, indentation, is_separator};
    use crate::config::{Config, SEPARATOR, TagKind};
    use crate::document::Document;
    use crate::error::DocumentError;
    use crate::outline;
    use crate::tags;
    use std::ops::Range;

    /// Host indentation settings used to rebuild relocated lines.
    #[derive(Debug, Clone, Copy)]
    pub struct Layout<'a> {
        pub tab_size: usize,
        pub indent_unit: &'a str,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ArchiveUnit {
        /// Source lines: the item followed by its notes.
        pub source: Range<usize>,
        pub project: String,
        pub rendered: Vec<String>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ArchivePlan {
        /// Separator + title must be appended before inserting.
        pub create_section: Option<String>,
        pub title_line: usize,
        pub units: Vec<ArchiveUnit>,
    }

    impl ArchivePlan {
        pub fn moved_lines(&self) -> usize {
            self.units.iter().map(|u| u.source.len()).sum()
        }
    }

    /// Index of the separator that is immediately followed by `archive_name`.
    pub fn locate_section<S: AsRef<str>>(lines: &[S], archive_name: &str) -> Option<usize> {
        lines.windows(2).position(|pair| {
            is_separator(pair[0].as_ref()) && pair[1].as_ref().trim_end() == archive_name
        })
    }

    pub fn plan<S: AsRef<str>>(
        lines: &[S],
        rows: (usize, usize),
        config: &Config,
        vocab: &Vocabulary,
        layout: Layout<'_>,
    ) -> ArchivePlan {
        let (separator, create_section) = match locate_section(lines, &config.archive_name) {
            Some(index) => (index, None),
            None => (lines.len(), Some(config.archive_name.clone())),
        };
        let (first, last) = rows;
        let end = last.saturating_add(1).min(separator);
        let project_marker = config.markers.get(TagKind::Project);

        let mut units = Vec::new();
        let mut n = first;
        while n < end {
            if !vocab.classify(lines[n].as_ref()).is_closed() {
                n += 1;
                continue;
            }
            let notes = outline::subtree(lines, n, separator, vocab, layout.tab_size);
            let source = n..notes.end;
            let project = outline::project_path(lines, n, vocab, layout.tab_size);
            let rendered = render_unit(lines, source.clone(), &project, project_marker, config, layout);
            units.push(ArchiveUnit {
                source,
                project,
                rendered,
            });
            n = notes.end;
        }

        ArchivePlan {
            create_section,
            title_line: separator + 1,
            units,
        }
    }

    fn render_unit<S: AsRef<str>>(
        lines: &[S],
        source: Range<usize>,
        project: &str,
        project_marker: &str,
        config: &Config,
        layout: Layout<'_>,
    ) -> Vec<String> {
        let top = source.start;
        let base = indentation(lines[top].as_ref(), layout.tab_size);
        source
            .map(|index| {
                let line = lines[index].as_ref();
                let relative = indentation(line, layout.tab_size).saturating_sub(base);
                let mut out = String::from(layout.indent_unit);
                out.push_str(&render_indent(relative, layout));
                out.push_str(line.trim());
                if index == top && !project.is_empty() {
                    out = tags::append(
                        &out,
                        &config.space_before_tag,
                        &tags::with_value(project_marker, project),
                    );
                }
                out
            })
            .collect()
    }

    fn render_indent(columns: usize, layout: Layout<'_>) -> String {
        if layout.indent_unit.starts_with('\t') {
            let tab_size = layout.tab_size.max(1);
            let mut out = "\t".repeat(columns / tab_size);
            out.push_str(&" ".repeat(columns % tab_size));
            out
        } else {
            " ".repeat(columns)
        }
    }

    /// Performs `plan` on `doc` and returns the number of moved lines.
    ///
    /// Units are inserted right below the title, last unit first, so each
    /// run lands in document order above older entries. Sources are then
    /// deleted bottom-up; they all sit above the section, so the insertions
    /// do not shift them.
    pub fn apply<D: Document + ?Sized>(plan: &ArchivePlan, doc: &mut D) -> Result<usize, DocumentError> {
        if let Some(title) = &plan.create_section {
            doc.append_line(SEPARATOR)?;
            doc.append_line(title)?;
        }
        for unit in plan.units.iter().rev() {
            for (offset, text) in unit.rendered.iter().enumerate() {
                doc.insert_line(plan.title_line + 1 + offset, text)?;
            }
        }
        for unit in plan.units.iter().rev() {
            for index in unit.source.clone().rev() {
                doc.delete_line(index)?;
            }
        }
        Ok(plan.moved_lines())
    }

}

pub mod commands {
    //! Editor commands: new task, complete, cancel, archive, snippet expansion.

    use crate::archive::{self, Layout};
    use crate::classify::{LineKind, Vocabulary, leading_whitespace};
    use crate::config::{Config, TagKind};
    use crate::document::{Document, Position};
    use crate::duration::{elapsed, format_date, format_duration};
    use crate::error::{ConfigError, DocumentError};
    use crate::tags;
    use chrono::{Local, NaiveDateTime};
    use std::ops::Range;
    use tracing::{debug, info, warn};

    pub trait Clock {
        fn now(&self) -> NaiveDateTime;
    }

    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> NaiveDateTime {
            Local::now().naive_local()
        }
    }

    #[derive(Debug, Clone, Copy)]
    pub struct FixedClock(pub NaiveDateTime);

    impl Clock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            self.0
        }
    }

    const WORD_SEPARATORS: &[char] = &['.', ','];

    pub struct TaskCommands<C: Clock = SystemClock> {
        config: Config,
        vocab: Vocabulary,
        clock: C,
    }

    impl TaskCommands<SystemClock> {
        pub fn new(config: Config) -> Result<Self, ConfigError> {
            Self::with_clock(config, SystemClock)
        }
    }

    impl<C: Clock> TaskCommands<C> {
        pub fn with_clock(config: Config, clock: C) -> Result<Self, ConfigError> {
            let config = config.normalized();
            let vocab = Vocabulary::new(&config)?;
            Ok(Self {
                config,
                vocab,
                clock,
            })
        }

        pub fn config(&self) -> &Config {
            &self.config
        }

        pub fn vocabulary(&self) -> &Vocabulary {
            &self.vocab
        }

        /// Installs new settings and recompiles the bullet vocabulary. The
        /// previous settings stay active if the new ones are invalid.
        pub fn reconfigure(&mut self, config: Config) -> Result<(), ConfigError> {
            let config = config.normalized();
            self.vocab = Vocabulary::new(&config)?;
            self.config = config;
            Ok(())
        }

        fn today(&self) -> Option<String> {
            let today = format_date(self.clock.now(), &self.config.date_format);
            if today.is_none() {
                warn!(format = %self.config.date_format, "date format cannot render the current time");
            }
            today
        }

        /// `marker(now)` or bare `marker`, per `done_date`; `None` for an
        /// empty marker.
        fn stamp(&self, marker: &str) -> Option<String> {
            if marker.is_empty() {
                return None;
            }
            Some(if self.config.done_date {
                tags::with_value(marker, &self.today()?)
            } else {
                marker.to_string()
            })
        }

        fn push_tag(&self, line: String, tag: Option<String>) -> String {
            match tag {
                Some(tag) => tags::append(&line, &self.config.space_before_tag, &tag),
                None => line,
            }
        }

        /// `@lasted(..)` / `@wasted(..)` measured from `@started`, falling
        /// back to `@created`.
        fn duration_tag(&self, line: &str, kind: TagKind) -> Option<String> {
            let markers = &self.config.markers;
            let start_marker = if tags::has(line, markers.get(TagKind::Started)) {
                markers.get(TagKind::Started)
            } else {
                markers.get(TagKind::Created)
            };
            let start = tags::get(line, start_marker)?;
            let toggles = tags::get_all(line, markers.get(TagKind::Toggle));
            let spent = elapsed(start, &toggles, self.clock.now(), &self.config.date_format)?;
            Some(tags::with_value(markers.get(kind), &format_duration(spent)))
        }

        fn has_start(&self, line: &str) -> bool {
            let markers = &self.config.markers;
            tags::has(line, markers.get(TagKind::Started)) || tags::has(line, markers.get(TagKind::Created))
        }

        /* ------------------------------ Line rules ------------------------------ */

        /// Result of "complete" on one line; `None` leaves it untouched.
        pub fn complete_line(&self, line: &str) -> Option<String> {
            let lasted = self.config.markers.get(TagKind::Lasted);
            let wasted = self.config.markers.get(TagKind::Wasted);
            let out = match self.vocab.classify(line) {
                LineKind::ItemDone => {
                    let line = self.vocab.swap_bullet(line, LineKind::ItemOpen)?;
                    let line = tags::remove(&line, &self.config.done_tag);
                    tags::remove(&line, lasted)
                }
                LineKind::ItemCancel => {
                    if tags::has(line, wasted) {
                        return None;
                    }
                    let line = self.vocab.swap_bullet(line, LineKind::ItemDone)?;
                    let line = tags::remove(&line, &self.config.cancel_tag);
                    self.push_tag(line, self.stamp(&self.config.done_tag))
                }
                LineKind::ItemOpen => {
                    let line = self.vocab.swap_bullet(line, LineKind::ItemDone)?;
                    let line = self.push_tag(line, self.stamp(&self.config.done_tag));
                    if self.has_start(&line) {
                        let tag = self.duration_tag(&line, TagKind::Lasted);
                        self.push_tag(line, tag)
                    } else {
                        line
                    }
                }
                _ => return None,
            };
            (out != line).then_some(out)
        }

        /// Result of "cancel" on one line; `None` leaves it untouched.
        pub fn cancel_line(&self, line: &str) -> Option<String> {
            let lasted = self.config.markers.get(TagKind::Lasted);
            let wasted = self.config.markers.get(TagKind::Wasted);
            let out = match self.vocab.classify(line) {
                LineKind::ItemCancel => {
                    let line = self.vocab.swap_bullet(line, LineKind::ItemOpen)?;
                    let line = tags::remove(&line, wasted);
                    tags::remove(&line, &self.config.cancel_tag)
                }
                LineKind::ItemDone => {
                    if tags::has(line, lasted) {
                        return None;
                    }
                    let line = self.vocab.swap_bullet(line, LineKind::ItemCancel)?;
                    let line = tags::remove(&line, &self.config.done_tag);
                    self.push_tag(line, self.stamp(&self.config.cancel_tag))
                }
                LineKind::ItemOpen => {
                    let line = self.vocab.swap_bullet(line, LineKind::ItemCancel)?;
                    let line = self.push_tag(line, self.stamp(&self.config.cancel_tag));
                    if self.has_start(&line) {
                        let tag = self.duration_tag(&line, TagKind::Wasted);
                        self.push_tag(line, tag)
                    } else {
                        line
                    }
                }
                _ => return None,
            };
            (out != line).then_some(out)
        }

        /* ------------------------------- Commands ------------------------------- */

        /// Turns selected plain lines into tasks; after an item, header or
        /// separator on the last selected row, opens a fresh task line below.
        pub fn new_task<D: Document + ?Sized>(&self, doc: &mut D) -> Result<(), DocumentError> {
            let (first, last) = doc.selection().rows();
            let bullet = &self.config.task_bullet_open;
            let mut caret = None;
            for n in first..=last.min(doc.line_count().saturating_sub(1)) {
                let line = doc.line(n)?;
                let indent = leading_whitespace(&line);
                match self.vocab.classify(&line) {
                    LineKind::Plain => {
                        let text = format!("{indent}{bullet} {}", &line[indent.len()..]);
                        doc.set_line(n, &text)?;
                        debug!(line = n, "turned plain line into a task");
                        if n == last {
                            caret = Some(Position::new(n, text.chars().count()));
                        }
                    }
                    kind if n == last => {
                        let offset = match kind {
                            LineKind::Header | LineKind::Separator => doc.indent_unit(),
                            _ => String::new(),
                        };
                        let created = if self.config.add_created_tag {
                            self.stamp(self.config.markers.get(TagKind::Created))
                                .map(|tag| format!("{}{}", self.config.space_before_tag, tag))
                                .unwrap_or_default()
                        } else {
                            String::new()
                        };
                        let head = format!("{indent}{offset}{bullet} ");
                        doc.insert_line(n + 1, &format!("{head}{created}"))?;
                        debug!(line = n + 1, "opened a new task line");
                        caret = Some(Position::new(n + 1, head.chars().count()));
                    }
                    _ => {}
                }
            }
            if let Some(position) = caret {
                doc.set_caret(position);
            }
            Ok(())
        }

        pub fn complete<D: Document + ?Sized>(&self, doc: &mut D) -> Result<usize, DocumentError> {
            let changed = self.rewrite_rows(doc, |line| self.complete_line(line))?;
            info!(changed, "complete");
            Ok(changed)
        }

        pub fn cancel<D: Document + ?Sized>(&self, doc: &mut D) -> Result<usize, DocumentError> {
            let changed = self.rewrite_rows(doc, |line| self.cancel_line(line))?;
            info!(changed, "cancel");
            Ok(changed)
        }

        fn rewrite_rows<D, F>(&self, doc: &mut D, rule: F) -> Result<usize, DocumentError>
        where
            D: Document + ?Sized,
            F: Fn(&str) -> Option<String>,
        {
            let (first, last) = doc.selection().rows();
            let mut changed = 0;
            for n in first..=last.min(doc.line_count().saturating_sub(1)) {
                let line = doc.line(n)?;
                if let Some(updated) = rule(&line) {
                    debug!(line = n, from = %line, to = %updated, "rewrote task");
                    doc.set_line(n, &updated)?;
                    changed += 1;
                }
            }
            Ok(changed)
        }

        /// Archives closed items in the selection; returns moved line count.
        pub fn archive<D: Document + ?Sized>(&self, doc: &mut D) -> Result<usize, DocumentError> {
            let snapshot = doc.snapshot()?;
            let indent_unit = doc.indent_unit();
            let layout = Layout {
                tab_size: doc.tab_size(),
                indent_unit: &indent_unit,
            };
            let plan = archive::plan(&snapshot, doc.selection().rows(), &self.config, &self.vocab, layout);
            if plan.create_section.is_some() {
                info!(title = %self.config.archive_name, "creating archive section");
            }
            let moved = archive::apply(&plan, doc)?;
            info!(units = plan.units.len(), moved, "archive");
            Ok(moved)
        }

        /* ------------------------------- Snippets ------------------------------- */

        pub fn snippet(&self, word: &str) -> Option<String> {
            let dated = |kind: TagKind| self.stamp(self.config.markers.get(kind));
            Some(match word {
                "c" => "@critical".to_string(),
                "h" => "@high".to_string(),
                "l" => "@low".to_string(),
                "t" => "@today".to_string(),
                "s" => dated(TagKind::Started)?,
                "tg" => dated(TagKind::Toggle)?,
                "cr" => dated(TagKind::Created)?,
                _ => return None,
            })
        }

        /// Tab handler: replaces a snippet abbreviation under the caret on an
        /// item line. Returns whether anything was expanded.
        pub fn expand_snippet<D: Document + ?Sized>(&self, doc: &mut D) -> Result<bool, DocumentError> {
            let selection = doc.selection();
            if !selection.is_single_line() {
                return Ok(false);
            }
            let Position { line: row, column } = selection.anchor;
            if row >= doc.line_count() {
                return Ok(false);
            }
            let line = doc.line(row)?;
            if !self.vocab.classify(&line).is_item() {
                return Ok(false);
            }
            let Some(range) = word_at(&line, column) else {
                return Ok(false);
            };
            let Some(snippet) = self.snippet(&line[range.clone()]) else {
                return Ok(false);
            };
            let text = format!("{}{}{}", &line[..range.start], snippet, &line[range.end..]);
            doc.set_line(row, &text)?;
            let caret = line[..range.start].chars().count() + snippet.chars().count();
            doc.set_caret(Position::new(row, caret));
            debug!(line = row, %snippet, "expanded snippet");
            Ok(true)
        }
    }

    fn is_word_separator(c: char) -> bool {
        c.is_whitespace() || WORD_SEPARATORS.contains(&c)
    }

    /// Byte range of the word touching char column `column`.
    fn word_at(line: &str, column: usize) -> Option<Range<usize>> {
        let cursor = line
            .char_indices()
            .nth(column)
            .map(|(i, _)| i)
            .unwrap_or(line.len());
        let start = line[..cursor]
            .char_indices()
            .rev()
            .find(|(_, c)| is_word_separator(*c))
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        let end = line[cursor..]
            .char_indices()
            .find(|(_, c)| is_word_separator(*c))
            .map(|(i, _)| cursor + i)
            .unwrap_or(line.len());
        (start < end).then_some(start..end)
    }

}

pub use archive::{ArchivePlan, locate_section};
pub use classify::{LineKind, Vocabulary};
pub use commands::{Clock, FixedClock, SystemClock, TaskCommands};
pub use config::{Config, SEPARATOR, TagKind, TagMarkers};
pub use document::{Document, Position, Selection, TextDocument};
pub use error::{ConfigError, DocumentError};
