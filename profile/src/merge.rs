use crate::MODE_SET;
use crate::Profile;
use crate::ProfileError;
use crate::codec::coalesce_blocks;
use regex::Regex;
use std::collections::BTreeMap;

/// Combines one profile set per source agent into a single set.
///
/// Blocks covering the same span of the same file combine per the counting
/// mode (OR in `set` mode, sum otherwise); a statement-count disagreement at
/// the same span is a data corruption and fails the merge, as does mixing
/// profiles of different modes.
pub fn merge_profile_sets(sets: Vec<Vec<Profile>>) -> Result<Vec<Profile>, ProfileError> {
    let mut files: BTreeMap<String, Profile> = BTreeMap::new();
    let mut mode: Option<String> = None;
    for set in sets {
        for profile in set {
            match &mode {
                None => mode = Some(profile.mode.clone()),
                Some(m) if *m != profile.mode => {
                    return Err(ProfileError::ModeMismatch {
                        left: m.clone(),
                        right: profile.mode,
                    });
                }
                Some(_) => {}
            }
            files
                .entry(profile.file_name.clone())
                .or_insert_with(|| Profile {
                    file_name: profile.file_name.clone(),
                    mode: profile.mode.clone(),
                    blocks: Vec::new(),
                })
                .blocks
                .extend(profile.blocks);
        }
    }

    let set_mode = mode.as_deref() == Some(MODE_SET);
    files
        .into_values()
        .map(|mut profile| {
            profile
                .blocks
                .sort_by_key(|b| (b.start_line, b.start_col, b.end_line, b.end_col));
            profile.blocks = coalesce_blocks(profile.blocks, set_mode, &profile.file_name)?;
            Ok(profile)
        })
        .collect()
}

/// Keeps only profiles whose file name matches at least one pattern.
pub fn filter_profiles(
    patterns: &[String],
    profiles: Vec<Profile>,
) -> Result<Vec<Profile>, ProfileError> {
    let regexes = compile_patterns(patterns)?;
    Ok(profiles
        .into_iter()
        .filter(|p| regexes.iter().any(|re| re.is_match(&p.file_name)))
        .collect())
}

/// Drops profiles whose file name matches any pattern.
pub fn skip_profiles(
    patterns: &[String],
    profiles: Vec<Profile>,
) -> Result<Vec<Profile>, ProfileError> {
    let regexes = compile_patterns(patterns)?;
    Ok(profiles
        .into_iter()
        .filter(|p| !regexes.iter().any(|re| re.is_match(&p.file_name)))
        .collect())
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, ProfileError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| ProfileError::BadPattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}
