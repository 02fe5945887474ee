//! Viewport title parsing.
//!
//! A duplicate-plan title carries its copy index in one of three forms:
//! `一层梁(2)`, `一层梁(二)`, or `一层梁-2`. The prefix is the plan name used
//! to group duplicates; a title matching none of the forms stays whole with
//! no index.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Parsed duplicate-title information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportInfo {
    pub prefix: String,
    pub index: u32,
}

static ARABIC_PAREN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)[(（]\s*(\d+)\s*[)）]\s*$").expect("static pattern"));
static HAN_PAREN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?)[(（]\s*([一二三四五六七八九十]+)\s*[)）]\s*$").expect("static pattern")
});
static DASH_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)-(\d+)\s*$").expect("static pattern"));

/// Parse the duplicate index out of a title. `None` when the title has no
/// recognised index form.
pub fn parse_title(title: &str) -> Option<ViewportInfo> {
    let title = title.trim();
    if let Some(caps) = ARABIC_PAREN.captures(title)
        && let Ok(index) = caps[2].parse::<u32>()
    {
        return Some(ViewportInfo {
            prefix: caps[1].trim().to_string(),
            index,
        });
    }
    if let Some(caps) = HAN_PAREN.captures(title)
        && let Some(index) = chinese_numeral(&caps[2])
    {
        return Some(ViewportInfo {
            prefix: caps[1].trim().to_string(),
            index,
        });
    }
    if let Some(caps) = DASH_SUFFIX.captures(title)
        && let Ok(index) = caps[2].parse::<u32>()
    {
        return Some(ViewportInfo {
            prefix: caps[1].trim().to_string(),
            index,
        });
    }
    None
}

/// Chinese numeral to integer, covering 1 to 99 (the realistic range of plan
/// copy indices). Larger or malformed numerals return `None`.
pub fn chinese_numeral(s: &str) -> Option<u32> {
    fn digit(c: char) -> Option<u32> {
        Some(match c {
            '一' => 1,
            '二' => 2,
            '三' => 3,
            '四' => 4,
            '五' => 5,
            '六' => 6,
            '七' => 7,
            '八' => 8,
            '九' => 9,
            _ => return None,
        })
    }
    let chars: Vec<char> = s.chars().collect();
    match chars.as_slice() {
        [c] if *c == '十' => Some(10),
        [c] => digit(*c),
        ['十', ones] => Some(10 + digit(*ones)?),
        [tens, '十'] => Some(digit(*tens)? * 10),
        [tens, c, ones] if *c == '十' => Some(digit(*tens)? * 10 + digit(*ones)?),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arabic_index_in_parens() {
        let info = parse_title("一层梁(2)").unwrap();
        assert_eq!(info.prefix, "一层梁");
        assert_eq!(info.index, 2);
    }

    #[test]
    fn fullwidth_parens_accepted() {
        let info = parse_title("PLAN（12）").unwrap();
        assert_eq!(info.prefix, "PLAN");
        assert_eq!(info.index, 12);
    }

    #[test]
    fn chinese_index_in_parens() {
        let info = parse_title("一层梁(二)").unwrap();
        assert_eq!(info.prefix, "一层梁");
        assert_eq!(info.index, 2);
        assert_eq!(parse_title("屋面梁(十)").unwrap().index, 10);
        assert_eq!(parse_title("屋面梁(十三)").unwrap().index, 13);
        assert_eq!(parse_title("屋面梁(二十)").unwrap().index, 20);
        assert_eq!(parse_title("屋面梁(九十九)").unwrap().index, 99);
    }

    #[test]
    fn dash_suffix_form() {
        let info = parse_title("PLAN-3").unwrap();
        assert_eq!(info.prefix, "PLAN");
        assert_eq!(info.index, 3);
    }

    #[test]
    fn plain_title_has_no_info() {
        assert!(parse_title("二层梁配筋图").is_none());
        // A parenthesised note that is not a numeral is not an index.
        assert!(parse_title("二层梁(修改)").is_none());
    }

    #[test]
    fn numeral_bounds() {
        assert_eq!(chinese_numeral("九"), Some(9));
        assert_eq!(chinese_numeral("四十二"), Some(42));
        assert_eq!(chinese_numeral("百"), None);
        assert_eq!(chinese_numeral(""), None);
    }
}
