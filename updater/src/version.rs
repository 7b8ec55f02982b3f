//! 버전 문자열 검증 및 비교 유틸리티
//!
//! 허용 형식은 `vMAJOR[.MINOR[.PATCH]]` 뿐입니다.
//! 검증을 통과한 `Version`만 비교와 URL/경로 조립에 사용됩니다.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::UpdaterError;

/// 로컬 기록이 없거나 손상됐을 때 사용하는 최저 버전
pub const FLOOR_VERSION: &str = "v0.0.0";

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^v[0-9]+(\.[0-9]+){0,2}$").expect("static version pattern"))
}

/// `vMAJOR[.MINOR[.PATCH]]` 형식인지 확인
pub fn is_valid_version(version: &str) -> bool {
    version_pattern().is_match(version)
}

/// 검증된 버전 문자열
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(String);

impl Version {
    pub fn parse(value: &str) -> Result<Self, UpdaterError> {
        if is_valid_version(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(UpdaterError::ValidationError {
                value: value.to_string(),
                reason: "expected vMAJOR[.MINOR[.PATCH]]".to_string(),
            })
        }
    }

    pub fn floor() -> Self {
        Self(FLOOR_VERSION.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 순서 비교용 (업데이트 판정에는 쓰지 않고 다운그레이드 경고에만 사용)
    pub fn semver(&self) -> Option<SemVer> {
        SemVer::parse(&self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// 시맨틱 버전 (major.minor.patch). 생략된 자리는 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    /// "v1", "v1.2", "v1.2.3" 형식을 파싱. 자리수가 u64를 넘으면 None
    pub fn parse(s: &str) -> Option<Self> {
        if !is_valid_version(s) {
            return None;
        }
        let mut parts = s[1..].split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        Some(Self { major, minor, patch })
    }

    pub fn is_newer_than(&self, other: &SemVer) -> bool {
        self > other
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
