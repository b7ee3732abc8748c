use anyhow::Result;
use covhub_profile::MODE_SET;
use covhub_profile::Profile;
use covhub_profile::boundaries;
use covhub_profile::color_css;
use covhub_profile::html_annotate;
use covhub_profile::parse_profiles;
use covhub_profile::percent;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Renders the annotated-source coverage report.
///
/// Files without embedded source bytes are silently skipped; the profile
/// may well cover dependencies the build chose not to embed.
pub fn render_report(
    profile_text: &str,
    sources: &HashMap<String, Vec<u8>>,
) -> Result<String> {
    let profiles = parse_profiles(profile_text)?;
    let set_mode = profiles.iter().any(|p| p.mode == MODE_SET);

    let mut sections = String::new();
    for profile in &profiles {
        let Some(src) = sources.get(&profile.file_name) else {
            continue;
        };
        let bounds = boundaries(profile, src);
        let mut annotated = Vec::new();
        html_annotate(src, &bounds, &mut annotated)?;
        let _ = writeln!(
            sections,
            "<h2>{} ({:.1}%)</h2>",
            profile.file_name,
            percent_covered(profile)
        );
        sections.push_str("<pre>");
        sections.push_str(&String::from_utf8_lossy(&annotated));
        sections.push_str("</pre>\n");
    }

    let legend = if set_mode {
        r#"<span class="cov0">not covered</span> <span class="cov8">covered</span>"#
    } else {
        r#"<span class="cov0">no coverage</span> <span class="cov1">low</span> <span class="cov10">high</span>"#
    };

    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str("<title>coverage report</title>\n<style>\n");
    out.push_str("body { background: black; color: rgb(80, 80, 80); }\n");
    out.push_str("body, pre { font-family: Menlo, monospace; }\n");
    out.push_str(&color_css());
    out.push_str("</style>\n</head>\n<body>\n");
    let _ = writeln!(out, "<div id=\"legend\">{legend}</div>");
    out.push_str(&sections);
    out.push_str("</body>\n</html>\n");
    Ok(out)
}

fn percent_covered(profile: &Profile) -> f64 {
    let mut covered = 0i64;
    let mut total = 0i64;
    for block in &profile.blocks {
        total += i64::from(block.num_stmt);
        if block.count > 0 {
            covered += i64::from(block.num_stmt);
        }
    }
    percent(covered, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(entries: &[(&str, &str)]) -> HashMap<String, Vec<u8>> {
        entries
            .iter()
            .map(|(name, body)| (name.to_string(), body.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn renders_annotated_sections_per_known_file() {
        let profile = "mode: count\napp/a.go:1.2,1.4 1 5\nmissing.go:1.1,1.2 1 1\n";
        let html = render_report(&profile, &sources(&[("app/a.go", "abcdef\n")])).unwrap();
        assert!(html.contains("<h2>app/a.go (100.0%)</h2>"));
        assert!(html.contains("title=\"5\""));
        assert!(!html.contains("missing.go"));
    }

    #[test]
    fn includes_the_color_classes() {
        let html = render_report("mode: set\n", &HashMap::new()).unwrap();
        assert!(html.contains(".cov0 { color: rgb(192, 0, 0) }"));
        assert!(html.contains(".cov10"));
    }

    #[test]
    fn propagates_parse_failures() {
        assert!(render_report("not a profile", &HashMap::new()).is_err());
    }
}
