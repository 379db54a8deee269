//! 版本与版本范围
//!
//! 模块与特性使用宽松的四段式版本 `major.minor.micro.qualifier`，
//! 解析为 [`semver::Version`]，限定符存放在构建元数据中，
//! 因此带限定符的版本总是排在同号无限定符版本之后。

use std::fmt;
use std::str::FromStr;

use semver::{BuildMetadata, Prerelease, Version};
use serde::{Deserialize, Serialize};

use crate::utils::{CoreError, Result};

/// 快照限定符后缀
pub const SNAPSHOT: &str = "SNAPSHOT";

/// 默认更新兼容范围模板：同主次版本，任意修订号
pub const DEFAULT_UPDATE_RANGE: &str = "[==,=+)";

/// 空版本 `0.0.0`
pub fn empty_version() -> Version {
    Version::new(0, 0, 0)
}

/// 宽松解析版本
///
/// 接受 `1`、`1.2`、`1.2.3`、`1.2.3.qualifier` 与 `1.2.3-qualifier`。
pub fn parse_version(input: &str) -> Result<Version> {
    let text = input.trim();
    if text.is_empty() {
        return Ok(empty_version());
    }

    let (numbers, qualifier) = split_qualifier(text);
    let mut parts = [0u64; 3];
    let mut count = 0;
    for segment in numbers.split('.') {
        if count == 3 {
            return Err(CoreError::InvalidVersion(input.to_string()));
        }
        parts[count] = segment
            .parse::<u64>()
            .map_err(|_| CoreError::InvalidVersion(input.to_string()))?;
        count += 1;
    }

    let mut version = Version::new(parts[0], parts[1], parts[2]);
    if let Some(qualifier) = qualifier.filter(|q| !q.is_empty()) {
        version.build = BuildMetadata::new(&sanitize_qualifier(qualifier))
            .map_err(|_| CoreError::InvalidVersion(input.to_string()))?;
    }
    Ok(version)
}

fn split_qualifier(text: &str) -> (&str, Option<&str>) {
    // 前三段之后的第一个 '.' 或 '-' 之后均为限定符
    let mut dots = 0;
    for (idx, ch) in text.char_indices() {
        match ch {
            '.' => {
                dots += 1;
                if dots == 3 {
                    return (&text[..idx], Some(&text[idx + 1..]));
                }
            }
            '-' | '+' => return (&text[..idx], Some(&text[idx + 1..])),
            _ => {}
        }
    }
    (text, None)
}

fn sanitize_qualifier(qualifier: &str) -> String {
    qualifier
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
        .collect()
}

/// 版本限定符（无则为空串）
pub fn qualifier(version: &Version) -> &str {
    version.build.as_str()
}

/// 是否为快照版本
pub fn is_snapshot(version: &Version) -> bool {
    qualifier(version).ends_with(SNAPSHOT)
}

/// 去掉限定符后的版本
fn base(version: &Version) -> Version {
    Version {
        major: version.major,
        minor: version.minor,
        patch: version.patch,
        pre: Prerelease::EMPTY,
        build: BuildMetadata::EMPTY,
    }
}

/// 区间表示法的版本范围
///
/// `[1.0,2.0)` 为左闭右开；单个版本 `1.0` 表示 `>= 1.0`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    /// 下界
    pub floor: Version,
    /// 下界是否包含
    pub floor_inclusive: bool,
    /// 上界（`None` 表示无上界）
    pub ceiling: Option<Version>,
    /// 上界是否包含
    pub ceiling_inclusive: bool,
}

impl VersionRange {
    /// 只包含单个版本的范围 `[v,v]`
    pub fn exact(version: Version) -> Self {
        Self {
            floor: version.clone(),
            floor_inclusive: true,
            ceiling: Some(version),
            ceiling_inclusive: true,
        }
    }

    /// 下界开始的无上界范围
    pub fn at_least(version: Version) -> Self {
        Self {
            floor: version,
            floor_inclusive: true,
            ceiling: None,
            ceiling_inclusive: false,
        }
    }

    /// 解析范围表达式
    pub fn parse(input: &str) -> Result<Self> {
        let text = input.trim();
        let invalid = |reason: &str| CoreError::InvalidVersionRange {
            range: input.to_string(),
            reason: reason.to_string(),
        };

        let first = text.chars().next().ok_or_else(|| invalid("范围为空"))?;
        if first != '[' && first != '(' {
            return Ok(Self::at_least(parse_version(text)?));
        }

        let last = text.chars().last().ok_or_else(|| invalid("范围为空"))?;
        if last != ']' && last != ')' {
            return Err(invalid("缺少右括号"));
        }
        let body = &text[1..text.len() - 1];
        let (low, high) = body.split_once(',').ok_or_else(|| invalid("缺少逗号"))?;

        let range = Self {
            floor: parse_version(low)?,
            floor_inclusive: first == '[',
            ceiling: Some(parse_version(high)?),
            ceiling_inclusive: last == ']',
        };
        if range.is_empty() {
            return Err(invalid("下界大于上界"));
        }
        Ok(range)
    }

    /// 范围是否为空
    pub fn is_empty(&self) -> bool {
        match &self.ceiling {
            Some(ceiling) => {
                self.floor > *ceiling
                    || (self.floor == *ceiling && !(self.floor_inclusive && self.ceiling_inclusive))
            }
            None => false,
        }
    }

    /// 版本是否落在范围内
    pub fn includes(&self, version: &Version) -> bool {
        let above_floor = if self.floor_inclusive {
            *version >= self.floor
        } else {
            *version > self.floor
        };
        if !above_floor {
            return false;
        }
        match &self.ceiling {
            Some(ceiling) if self.ceiling_inclusive => version <= ceiling,
            Some(ceiling) => version < ceiling,
            None => true,
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ceiling {
            None => write!(f, "{}", self.floor),
            Some(ceiling) => write!(
                f,
                "{}{},{}{}",
                if self.floor_inclusive { '[' } else { '(' },
                self.floor,
                ceiling,
                if self.ceiling_inclusive { ']' } else { ')' },
            ),
        }
    }
}

impl TryFrom<String> for VersionRange {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<VersionRange> for String {
    fn from(value: VersionRange) -> Self {
        value.to_string()
    }
}

impl FromStr for VersionRange {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// 版本掩码的单个位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MaskOp {
    Keep,
    Increment,
    Decrement,
    Drop,
}

/// 相对版本的范围模板
///
/// 模板形如 `[==,=+)`：每个字符对应版本的一段，`=` 保留，`+` 加一，
/// `-` 减一，`~` 置零；未给出的段置零。第四位为 `=` 时保留限定符。
/// 也接受 `${range;[==,=+)}` 写法。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RangeTemplate {
    source: String,
    floor_inclusive: bool,
    floor: Vec<MaskOp>,
    ceiling: Vec<MaskOp>,
    ceiling_inclusive: bool,
}

impl RangeTemplate {
    /// 解析范围模板
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| CoreError::InvalidVersionRange {
            range: input.to_string(),
            reason: reason.to_string(),
        };

        let mut text = input.trim();
        if let Some(inner) = text.strip_prefix("${range;") {
            text = inner.strip_suffix('}').ok_or_else(|| invalid("宏缺少右花括号"))?;
        }

        let floor_inclusive = match text.chars().next() {
            Some('[') => true,
            Some('(') => false,
            _ => return Err(invalid("缺少左括号")),
        };
        let ceiling_inclusive = match text.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(invalid("缺少右括号")),
        };
        let body = &text[1..text.len() - 1];
        let (low, high) = body.split_once(',').ok_or_else(|| invalid("缺少逗号"))?;

        let mask = |s: &str| -> Result<Vec<MaskOp>> {
            if s.chars().count() > 4 {
                return Err(invalid("掩码最多四位"));
            }
            s.chars()
                .map(|c| match c {
                    '=' => Ok(MaskOp::Keep),
                    '+' => Ok(MaskOp::Increment),
                    '-' => Ok(MaskOp::Decrement),
                    '~' => Ok(MaskOp::Drop),
                    other => Err(invalid(&format!("未知掩码字符 '{other}'"))),
                })
                .collect()
        };

        Ok(Self {
            source: input.to_string(),
            floor_inclusive,
            floor: mask(low.trim())?,
            ceiling: mask(high.trim())?,
            ceiling_inclusive,
        })
    }

    /// 针对给定版本展开为具体范围
    pub fn expand(&self, version: &Version) -> VersionRange {
        VersionRange {
            floor: apply_mask(&self.floor, version),
            floor_inclusive: self.floor_inclusive,
            ceiling: Some(apply_mask(&self.ceiling, version)),
            ceiling_inclusive: self.ceiling_inclusive,
        }
    }

    /// 模板原文
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn apply_mask(mask: &[MaskOp], version: &Version) -> Version {
    let segments = [version.major, version.minor, version.patch];
    let mut out = [0u64; 3];
    for (idx, op) in mask.iter().take(3).enumerate() {
        out[idx] = match op {
            MaskOp::Keep => segments[idx],
            MaskOp::Increment => segments[idx].saturating_add(1),
            MaskOp::Decrement => segments[idx].saturating_sub(1),
            MaskOp::Drop => 0,
        };
    }
    let mut result = Version::new(out[0], out[1], out[2]);
    if mask.get(3) == Some(&MaskOp::Keep) {
        result.build = version.build.clone();
    } else {
        result = base(&result);
    }
    result
}

impl Default for RangeTemplate {
    fn default() -> Self {
        // 常量模板必然可解析
        Self {
            source: DEFAULT_UPDATE_RANGE.to_string(),
            floor_inclusive: true,
            floor: vec![MaskOp::Keep, MaskOp::Keep],
            ceiling: vec![MaskOp::Keep, MaskOp::Increment],
            ceiling_inclusive: false,
        }
    }
}

impl TryFrom<String> for RangeTemplate {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RangeTemplate> for String {
    fn from(value: RangeTemplate) -> Self {
        value.source
    }
}

impl fmt::Display for RangeTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
