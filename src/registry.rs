//! 사용자 레지스트리
//!
//! 닉네임 순으로 정렬된 사용자 목록 + 닉네임 인덱스.
//! 세션 컨트롤러가 단일 락 아래에서만 변경함

use std::collections::HashMap;

use crate::user::{User, UserCode};

/// 사용자 레지스트리
#[derive(Debug, Clone, Default)]
pub struct UserRegistry {
    /// 닉네임 순 정렬 (대소문자 무시)
    users: Vec<User>,

    /// 소문자 닉네임 → 사용자 코드
    nicks: HashMap<String, UserCode>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 사용자 추가
    ///
    /// 코드나 닉네임이 이미 있으면 추가하지 않고 false
    pub fn add(&mut self, user: User) -> bool {
        if self.contains(user.code) || self.nick_in_use(&user.nick, None) {
            return false;
        }
        self.nicks.insert(user.nick.to_lowercase(), user.code);
        self.users.push(user);
        self.sort();
        true
    }

    /// 사용자 제거
    pub fn remove(&mut self, code: UserCode) -> Option<User> {
        let pos = self.users.iter().position(|u| u.code == code)?;
        let user = self.users.remove(pos);
        self.nicks.remove(&user.nick.to_lowercase());
        Some(user)
    }

    pub fn get(&self, code: UserCode) -> Option<&User> {
        self.users.iter().find(|u| u.code == code)
    }

    pub fn contains(&self, code: UserCode) -> bool {
        self.get(code).is_some()
    }

    /// 닉네임으로 조회 (대소문자 무시)
    pub fn get_by_nick(&self, nick: &str) -> Option<&User> {
        let code = self.nicks.get(&nick.to_lowercase())?;
        self.get(*code)
    }

    /// 닉네임 사용 여부 (except 코드의 사용자는 제외)
    pub fn nick_in_use(&self, nick: &str, except: Option<UserCode>) -> bool {
        match self.nicks.get(&nick.to_lowercase()) {
            Some(code) => Some(*code) != except,
            None => false,
        }
    }

    /// 닉네임 변경
    ///
    /// 다른 사용자가 이미 쓰는 닉네임이면 false
    pub fn rename(&mut self, code: UserCode, nick: &str) -> bool {
        if self.nick_in_use(nick, Some(code)) {
            return false;
        }
        let Some(user) = self.users.iter_mut().find(|u| u.code == code) else {
            return false;
        };
        self.nicks.remove(&user.nick.to_lowercase());
        user.nick = nick.to_string();
        self.nicks.insert(nick.to_lowercase(), code);
        self.sort();
        true
    }

    /// 사용자 필드 갱신 (닉네임 제외)
    ///
    /// 닉네임 변경은 rename으로만 가능. 클로저에서 바꾼 닉네임은 되돌림
    pub fn update<F>(&mut self, code: UserCode, f: F) -> Option<User>
    where
        F: FnOnce(&mut User),
    {
        let user = self.users.iter_mut().find(|u| u.code == code)?;
        let nick = user.nick.clone();
        f(user);
        user.nick = nick;
        Some(user.clone())
    }

    /// 사용자 코드 변경 (코드 충돌 재생성 시)
    pub fn recode(&mut self, old: UserCode, new: UserCode) -> bool {
        if self.contains(new) {
            return false;
        }
        let Some(user) = self.users.iter_mut().find(|u| u.code == old) else {
            return false;
        };
        user.code = new;
        self.nicks.insert(user.nick.to_lowercase(), new);
        true
    }

    /// 조건에 맞는 사용자 일괄 제거
    pub fn remove_where<F>(&mut self, mut pred: F) -> Vec<User>
    where
        F: FnMut(&User) -> bool,
    {
        let (removed, kept): (Vec<User>, Vec<User>) =
            self.users.drain(..).partition(|u| pred(u));
        self.users = kept;
        for user in &removed {
            self.nicks.remove(&user.nick.to_lowercase());
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.iter()
    }

    /// 스냅샷 복사
    pub fn snapshot(&self) -> Vec<User> {
        self.users.clone()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn sort(&mut self) {
        self.users
            .sort_by(|a, b| a.nick.to_lowercase().cmp(&b.nick.to_lowercase()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(code: UserCode, nick: &str) -> User {
        User::new(code, nick, 0)
    }

    #[test]
    fn test_add_and_lookup() {
        let mut registry = UserRegistry::new();
        assert!(registry.add(user(1, "bob")));
        assert!(registry.add(user(2, "Amy")));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(1).map(|u| u.nick.as_str()), Some("bob"));
        assert_eq!(registry.get_by_nick("BOB").map(|u| u.code), Some(1));

        // 닉네임 순 정렬
        let nicks: Vec<_> = registry.iter().map(|u| u.nick.clone()).collect();
        assert_eq!(nicks, vec!["Amy", "bob"]);
    }

    #[test]
    fn test_duplicate_code_or_nick_rejected() {
        let mut registry = UserRegistry::new();
        assert!(registry.add(user(1, "bob")));
        assert!(!registry.add(user(1, "other")));
        assert!(!registry.add(user(2, "Bob")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_twice_is_noop() {
        let mut registry = UserRegistry::new();
        registry.add(user(1, "bob"));
        assert!(registry.remove(1).is_some());
        assert!(registry.remove(1).is_none());
        assert!(!registry.nick_in_use("bob", None));
    }

    #[test]
    fn test_rename_keeps_index() {
        let mut registry = UserRegistry::new();
        registry.add(user(1, "bob"));
        registry.add(user(2, "amy"));

        assert!(!registry.rename(1, "AMY"));
        assert!(registry.rename(1, "zed"));
        assert!(registry.get_by_nick("bob").is_none());
        assert_eq!(registry.get_by_nick("zed").map(|u| u.code), Some(1));

        // 대소문자만 바꾸는 것은 허용
        assert!(registry.rename(1, "Zed"));
        assert_eq!(registry.get(1).map(|u| u.nick.as_str()), Some("Zed"));
    }

    #[test]
    fn test_update_cannot_change_nick() {
        let mut registry = UserRegistry::new();
        registry.add(user(1, "bob"));
        let updated = registry
            .update(1, |u| {
                u.away = true;
                u.nick = "hacked".into();
            })
            .unwrap();
        assert!(updated.away);
        assert_eq!(updated.nick, "bob");
        assert!(registry.get_by_nick("bob").is_some());
    }

    #[test]
    fn test_remove_where() {
        let mut registry = UserRegistry::new();
        registry.add(user(1, "a"));
        registry.add(user(2, "b"));
        registry.add(user(3, "c"));

        let removed = registry.remove_where(|u| u.code != 2);
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.len(), 1);
        assert!(!registry.nick_in_use("a", None));
        assert!(registry.nick_in_use("b", None));
    }

    #[test]
    fn test_recode() {
        let mut registry = UserRegistry::new();
        registry.add(user(1, "me"));
        assert!(registry.recode(1, 5));
        assert!(registry.get(1).is_none());
        assert_eq!(registry.get_by_nick("me").map(|u| u.code), Some(5));
    }
}
