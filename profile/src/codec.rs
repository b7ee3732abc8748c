use crate::MODE_SET;
use crate::ProfileError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Execution counts for every instrumented block of one source file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub file_name: String,
    pub mode: String,
    pub blocks: Vec<ProfileBlock>,
}

/// One contiguous source region with a single execution count.
///
/// Columns are byte-based and 1-indexed, matching the positions the agent
/// unpacks from its counter tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileBlock {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
    pub num_stmt: u32,
    pub count: u64,
}

impl ProfileBlock {
    fn start_key(&self) -> (u32, u32) {
        (self.start_line, self.start_col)
    }

    fn span_key(&self) -> (u32, u32, u32, u32) {
        (self.start_line, self.start_col, self.end_line, self.end_col)
    }
}

static LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+):(\d+)\.(\d+),(\d+)\.(\d+) (\d+) (\d+)$").expect("profile line regex")
});

/// Decodes a textual coverage profile into per-file profiles.
///
/// The first non-empty line must be a `mode: <mode>` header; every other
/// non-empty line is one block record. Blocks of each file come back sorted
/// by start position with duplicate spans coalesced, and the profiles are
/// sorted by file name.
pub fn parse_profiles(input: &str) -> Result<Vec<Profile>, ProfileError> {
    let mut files: BTreeMap<String, Profile> = BTreeMap::new();
    let mut mode = String::new();
    for line in input.lines() {
        if line.is_empty() {
            continue;
        }
        if mode.is_empty() {
            match line.strip_prefix("mode: ") {
                Some(value) if !value.is_empty() => {
                    mode = value.to_string();
                    continue;
                }
                _ => return Err(ProfileError::BadModeLine(line.to_string())),
            }
        }
        let captures = LINE_RE
            .captures(line)
            .ok_or_else(|| ProfileError::MalformedLine(line.to_string()))?;
        let file_name = captures[1].to_string();
        let block = ProfileBlock {
            start_line: parse_field(line, &captures[2])?,
            start_col: parse_field(line, &captures[3])?,
            end_line: parse_field(line, &captures[4])?,
            end_col: parse_field(line, &captures[5])?,
            num_stmt: parse_field(line, &captures[6])?,
            count: parse_field(line, &captures[7])?,
        };
        files
            .entry(file_name.clone())
            .or_insert_with(|| Profile {
                file_name,
                mode: mode.clone(),
                blocks: Vec::new(),
            })
            .blocks
            .push(block);
    }

    let set_mode = mode == MODE_SET;
    files
        .into_values()
        .map(|mut profile| {
            profile.blocks.sort_by_key(ProfileBlock::start_key);
            profile.blocks = coalesce_blocks(profile.blocks, set_mode, &profile.file_name)?;
            Ok(profile)
        })
        .collect()
}

fn parse_field<T: std::str::FromStr>(line: &str, value: &str) -> Result<T, ProfileError> {
    value.parse().map_err(|_| ProfileError::BadNumber {
        line: line.to_string(),
        value: value.to_string(),
    })
}

/// Merges adjacent records covering the same span. Expects `blocks` sorted
/// by start position; duplicate spans must agree on the statement count.
pub(crate) fn coalesce_blocks(
    blocks: Vec<ProfileBlock>,
    set_mode: bool,
    file_name: &str,
) -> Result<Vec<ProfileBlock>, ProfileError> {
    let mut out: Vec<ProfileBlock> = Vec::with_capacity(blocks.len());
    for block in blocks {
        match out.last_mut() {
            Some(last) if last.span_key() == block.span_key() => {
                if last.num_stmt != block.num_stmt {
                    return Err(ProfileError::InconsistentNumStmt {
                        file: file_name.to_string(),
                        from: last.num_stmt,
                        to: block.num_stmt,
                    });
                }
                if set_mode {
                    last.count |= block.count;
                } else {
                    last.count += block.count;
                }
            }
            _ => out.push(block),
        }
    }
    Ok(out)
}

/// Writes profiles back out in the textual wire format.
pub fn emit_profiles<W: fmt::Write>(profiles: &[Profile], out: &mut W) -> fmt::Result {
    let Some(first) = profiles.first() else {
        return Ok(());
    };
    writeln!(out, "mode: {}", first.mode)?;
    for profile in profiles {
        for block in &profile.blocks {
            writeln!(
                out,
                "{}:{}.{},{}.{} {} {}",
                profile.file_name,
                block.start_line,
                block.start_col,
                block.end_line,
                block.end_col,
                block.num_stmt,
                block.count
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn block(span: (u32, u32, u32, u32), num_stmt: u32, count: u64) -> ProfileBlock {
        ProfileBlock {
            start_line: span.0,
            start_col: span.1,
            end_line: span.2,
            end_col: span.3,
            num_stmt,
            count,
        }
    }

    #[test]
    fn parses_a_single_file() {
        let input = "mode: count\nfoo/bar.go:1.10,3.2 2 7\n";
        let profiles = parse_profiles(input).unwrap();
        assert_eq!(
            profiles,
            vec![Profile {
                file_name: "foo/bar.go".to_string(),
                mode: "count".to_string(),
                blocks: vec![block((1, 10, 3, 2), 2, 7)],
            }]
        );
    }

    #[test]
    fn sorts_files_and_blocks() {
        let input = "mode: count\n\
                     b.go:5.1,6.1 1 0\n\
                     b.go:1.1,2.1 1 3\n\
                     a.go:1.1,2.1 1 1\n";
        let profiles = parse_profiles(input).unwrap();
        assert_eq!(profiles[0].file_name, "a.go");
        assert_eq!(profiles[1].file_name, "b.go");
        assert_eq!(
            profiles[1].blocks,
            vec![block((1, 1, 2, 1), 1, 3), block((5, 1, 6, 1), 1, 0)]
        );
    }

    #[test]
    fn file_names_may_contain_colons() {
        let input = "mode: set\nC:/work/x.go:1.1,2.1 1 1\n";
        let profiles = parse_profiles(input).unwrap();
        assert_eq!(profiles[0].file_name, "C:/work/x.go");
    }

    #[test]
    fn duplicate_spans_sum_in_count_mode() {
        let input = "mode: count\nfoo.go:1.1,1.10 1 2\nfoo.go:1.1,1.10 1 5\n";
        let profiles = parse_profiles(input).unwrap();
        assert_eq!(profiles[0].blocks, vec![block((1, 1, 1, 10), 1, 7)]);
    }

    #[test]
    fn duplicate_spans_or_in_set_mode() {
        let input = "mode: set\nfoo.go:1.1,1.10 1 1\nfoo.go:1.1,1.10 1 0\n";
        let profiles = parse_profiles(input).unwrap();
        assert_eq!(profiles[0].blocks, vec![block((1, 1, 1, 10), 1, 1)]);
    }

    #[test]
    fn duplicate_spans_must_agree_on_statement_count() {
        let input = "mode: count\nfoo.go:1.1,1.10 1 2\nfoo.go:1.1,1.10 3 5\n";
        let err = parse_profiles(input).unwrap_err();
        assert!(matches!(
            err,
            ProfileError::InconsistentNumStmt { from: 1, to: 3, .. }
        ));
    }

    #[test]
    fn rejects_missing_mode_header() {
        let err = parse_profiles("foo.go:1.1,1.10 1 1\n").unwrap_err();
        assert!(matches!(err, ProfileError::BadModeLine(_)));
    }

    #[test]
    fn rejects_empty_mode() {
        let err = parse_profiles("mode: \nfoo.go:1.1,1.10 1 1\n").unwrap_err();
        assert!(matches!(err, ProfileError::BadModeLine(_)));
    }

    #[test]
    fn rejects_malformed_record() {
        let err = parse_profiles("mode: count\nnot a record\n").unwrap_err();
        assert!(matches!(err, ProfileError::MalformedLine(_)));
    }

    #[test]
    fn rejects_numeric_overflow() {
        let input = "mode: count\nfoo.go:99999999999999999999.1,1.10 1 1\n";
        let err = parse_profiles(input).unwrap_err();
        assert!(matches!(err, ProfileError::BadNumber { .. }));
    }

    #[test]
    fn emit_round_trips() {
        let input = "mode: atomic\n\
                     a.go:1.1,2.10 2 4\n\
                     a.go:3.1,4.10 1 0\n\
                     z/b.go:7.2,9.3 5 1\n";
        let profiles = parse_profiles(input).unwrap();
        let mut emitted = String::new();
        emit_profiles(&profiles, &mut emitted).unwrap();
        assert_eq!(emitted, input);
        let reparsed = parse_profiles(&emitted).unwrap();
        assert_eq!(reparsed, profiles);
    }

    #[test]
    fn emit_of_empty_set_is_empty() {
        let mut emitted = String::new();
        emit_profiles(&[], &mut emitted).unwrap();
        assert_eq!(emitted, "");
    }
}
