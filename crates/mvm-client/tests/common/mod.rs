//! Shared fixtures for the client integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mvm_client::host::{
    Capability, DeliveryStyle, FingerInfo, HostAdapter, LocalUser, LogLevel,
};
use mvm_client::MeshConfig;

/// A scripted host MUD: a fixed online-player list, recorded deliveries.
#[derive(Default)]
pub struct StubHost {
    users: Mutex<Vec<LocalUser>>,
    deliveries: Mutex<Vec<(String, String, DeliveryStyle)>>,
    logs: Mutex<Vec<(LogLevel, String)>>,
    denied: Mutex<Vec<(String, Capability)>>,
}

impl StubHost {
    pub fn new(users: Vec<LocalUser>) -> Arc<Self> {
        Arc::new(Self {
            users: Mutex::new(users),
            ..Self::default()
        })
    }

    pub fn user(name: &str, level: u32) -> LocalUser {
        LocalUser {
            name: name.to_owned(),
            display_name: name.to_owned(),
            level,
            idle_seconds: 0,
            location: "The Square".to_owned(),
        }
    }

    pub fn deny(&self, user: &str, capability: Capability) {
        self.denied
            .lock()
            .unwrap()
            .push((user.to_lowercase(), capability));
    }

    pub fn deliveries(&self) -> Vec<(String, String, DeliveryStyle)> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn deliveries_for(&self, user: &str) -> Vec<(String, DeliveryStyle)> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _, _)| u.eq_ignore_ascii_case(user))
            .map(|(_, text, style)| (text.clone(), *style))
            .collect()
    }

    pub fn logs(&self) -> Vec<(LogLevel, String)> {
        self.logs.lock().unwrap().clone()
    }

    /// Poll until `user` has received a line containing `needle`.
    pub async fn wait_for_delivery(
        &self,
        user: &str,
        needle: &str,
        wait: Duration,
    ) -> Option<(String, DeliveryStyle)> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let found = self
                .deliveries_for(user)
                .into_iter()
                .find(|(text, _)| text.contains(needle));
            if found.is_some() {
                return found;
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl HostAdapter for StubHost {
    fn find_user(&self, name: &str) -> Option<LocalUser> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    fn online_users(&self) -> Vec<LocalUser> {
        self.users.lock().unwrap().clone()
    }

    fn deliver(&self, user: &str, text: &str, style: DeliveryStyle) {
        self.deliveries
            .lock()
            .unwrap()
            .push((user.to_owned(), text.to_owned(), style));
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.logs.lock().unwrap().push((level, message.to_owned()));
    }

    fn user_level(&self, user: &str) -> u32 {
        self.find_user(user).map_or(0, |u| u.level)
    }

    fn user_can(&self, user: &str, capability: Capability) -> bool {
        !self
            .denied
            .lock()
            .unwrap()
            .contains(&(user.to_lowercase(), capability))
    }

    fn finger_info(&self, user: &str) -> Option<FingerInfo> {
        self.find_user(user).map(|u| FingerInfo {
            email: Some(format!("{}@alpha.example", u.name.to_lowercase())),
            plan: Some("Slay dragons.".to_owned()),
            last_login: Some("2024-01-01T00:00:00Z".to_owned()),
        })
    }

    fn is_profane(&self, text: &str) -> bool {
        text.contains("grues")
    }
}

/// Config pointed at a mock gateway, tuned for fast tests.
pub fn test_config(mud_name: &str, host: &str, port: u16) -> MeshConfig {
    let mut cfg = MeshConfig::new(mud_name, "test-token");
    cfg.gateway.host = host.to_owned();
    cfg.gateway.port = port;
    cfg
}
