//! 채팅방 주제

use serde::{Deserialize, Serialize};

/// 현재 주제
///
/// 타임스탬프 기준 단조 증가: 더 새로운 주제만 적용됨
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    /// 주제 텍스트 (빈 문자열이면 주제 해제)
    pub text: String,

    /// 변경한 사용자 닉네임
    pub author: String,

    /// 변경 시각 (epoch ms, 0이면 주제 없음)
    pub timestamp: u64,
}

impl Topic {
    pub fn new(text: impl Into<String>, author: impl Into<String>, timestamp: u64) -> Self {
        Self {
            text: text.into(),
            author: author.into(),
            timestamp,
        }
    }

    /// 주제가 설정된 적 있는지
    pub fn is_set(&self) -> bool {
        self.timestamp > 0
    }

    /// 새 주제 적용 (더 새로울 때만)
    ///
    /// 적용되면 true
    pub fn apply(&mut self, update: Topic) -> bool {
        if self.is_set() && update.timestamp <= self.timestamp {
            return false;
        }
        *self = update;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_topic_applies() {
        let mut topic = Topic::default();
        assert!(!topic.is_set());
        assert!(topic.apply(Topic::new("hello", "bob", 100)));
        assert_eq!(topic.text, "hello");
    }

    #[test]
    fn test_older_topic_ignored() {
        let mut topic = Topic::default();
        assert!(topic.apply(Topic::new("newer", "bob", 2000)));
        assert!(!topic.apply(Topic::new("older", "amy", 1000)));
        assert_eq!(topic.text, "newer");
        assert_eq!(topic.timestamp, 2000);
    }

    #[test]
    fn test_same_timestamp_ignored() {
        let mut topic = Topic::new("a", "bob", 500);
        assert!(!topic.apply(Topic::new("b", "amy", 500)));
        assert_eq!(topic.text, "a");
    }
}
