//! 会话权威服务返回的会话列表模型

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// 单个活跃登录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WireSessionRecord")]
pub struct SessionRecord {
    pub session_id: String,
    pub issued_at: Option<NaiveDateTime>,
    pub expires_at: Option<NaiveDateTime>,
}

/// 权威服务的原始记录，会话 ID 可能以 `sessionId` 或 `jti` 出现
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSessionRecord {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    jti: Option<String>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    issued_at: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    expires_at: Option<NaiveDateTime>,
}

impl TryFrom<WireSessionRecord> for SessionRecord {
    type Error = String;

    // 两者都有时以 sessionId 为准
    fn try_from(wire: WireSessionRecord) -> Result<Self, Self::Error> {
        let session_id = wire
            .session_id
            .or(wire.jti)
            .ok_or_else(|| "missing field `sessionId`".to_string())?;

        Ok(Self {
            session_id,
            issued_at: wire.issued_at,
            expires_at: wire.expires_at,
        })
    }
}

/// 会话权威服务的查询结果，网关只读不改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListResponse {
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub partition: String,
    pub max_sessions: u32,
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
}

impl SessionListResponse {
    /// 展平后的会话 ID 集合（写入缓存的值）
    pub fn session_ids(&self) -> HashSet<String> {
        self.sessions.iter().map(|s| s.session_id.clone()).collect()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.iter().any(|s| s.session_id == session_id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// 配额至少为 1
    pub fn effective_max_sessions(&self) -> u32 {
        self.max_sessions.max(1)
    }

    /// 活跃会话数已达上限
    pub fn is_quota_full(&self) -> bool {
        self.active_count() >= self.effective_max_sessions() as usize
    }
}

/// 接受 `2024-01-01T10:00:00[.fff]` 或 RFC 3339，无法解析时视为缺失
fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(&s).ok().map(|dt| dt.naive_utc()))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_authority_payload() {
        let json = r#"{
            "identity": "E100",
            "partition": "staff",
            "maxSessions": 3,
            "sessions": [
                {"sessionId": "J1", "issuedAt": "2025-03-01T08:00:00", "expiresAt": "2025-03-01T20:00:00.125"},
                {"jti": "J2", "issuedAt": "2025-03-01T09:00:00Z"},
                {"sessionId": "J3", "issuedAt": "yesterday"}
            ]
        }"#;
        let resp: SessionListResponse = serde_json::from_str(json).unwrap();

        assert_eq!(resp.active_count(), 3);
        assert!(resp.contains("J2"));
        assert!(resp.sessions[0].expires_at.is_some());
        assert!(resp.sessions[1].issued_at.is_some());
        assert!(resp.sessions[2].issued_at.is_none());
        assert_eq!(
            resp.session_ids(),
            HashSet::from(["J1".to_string(), "J2".to_string(), "J3".to_string()])
        );
    }

    #[test]
    fn test_session_id_preferred_over_jti() {
        let record: SessionRecord =
            serde_json::from_str(r#"{"sessionId": "S1", "jti": "J1", "issuedAt": "2025-03-01T08:00:00"}"#).unwrap();
        assert_eq!(record.session_id, "S1");
        assert!(record.issued_at.is_some());

        let record: SessionRecord = serde_json::from_str(r#"{"jti": "J1"}"#).unwrap();
        assert_eq!(record.session_id, "J1");

        assert!(serde_json::from_str::<SessionRecord>(r#"{"issuedAt": "2025-03-01T08:00:00"}"#).is_err());
    }

    #[test]
    fn test_missing_max_sessions_is_rejected() {
        let err = serde_json::from_str::<SessionListResponse>(r#"{"sessions": []}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_quota_boundary() {
        let resp = |n: usize, max: u32| SessionListResponse {
            identity: "E100".into(),
            partition: "staff".into(),
            max_sessions: max,
            sessions: (0..n)
                .map(|i| SessionRecord {
                    session_id: format!("S{i}"),
                    issued_at: None,
                    expires_at: None,
                })
                .collect(),
        };

        assert!(resp(2, 2).is_quota_full());
        assert!(!resp(1, 2).is_quota_full());
        // maxSessions = 0 按 1 处理
        assert!(resp(1, 0).is_quota_full());
        assert!(!resp(0, 0).is_quota_full());
    }
}
