//! Outbound commands.
//!
//! A [`Command`] is a homework request addressed to one item (or to every
//! item via [`ALL_ITEMS`](crate::topics::ALL_ITEMS)). It is built once by
//! [`CommandBuilder`], which stamps it with a fresh [`IdempotencyKey`]; the
//! payload can be serialized any number of times and always carries that same
//! key, so a republish is deduplicated by the backend.
//!
//! Device-level requests (bind, roster refresh, update check) are
//! [`DeviceCommand`]s and carry no key.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use rand_core::RngCore;
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::error::CommandError;
use crate::topics::{Topic, Topics};

/// A request to move a homework item to its next phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(rename_all = "snake_case")]
pub enum HomeworkAction {
    Start,
    Submit,
    Wait,
    PauseAll,
}

impl HomeworkAction {
    pub fn as_str(self) -> &'static str {
        match self {
            HomeworkAction::Start => "start",
            HomeworkAction::Submit => "submit",
            HomeworkAction::Wait => "wait",
            HomeworkAction::PauseAll => "pause_all",
        }
    }
}

/// Deduplication token carried by every homework command.
///
/// Random (UUIDv4 layout) with the builder's session sequence number in the
/// last four bytes, so two keys from one builder can never collide even if
/// the entropy source repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(Uuid);

impl IdempotencyKey {
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl Serialize for IdempotencyKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0.hyphenated())
    }
}

/// An immutable homework command together with its destination topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    #[serde(skip)]
    topic: Topic,
    action: HomeworkAction,
    academy_id: String,
    student_id: String,
    item_id: String,
    idempotency_key: IdempotencyKey,
    #[serde(rename = "at")]
    issued_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_by: Option<String>,
}

impl Command {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn action(&self) -> HomeworkAction {
        self.action
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        self.idempotency_key
    }

    pub fn issued_at(&self) -> &str {
        &self.issued_at
    }

    /// JSON body. Identical on every call.
    pub fn payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Builds [`Command`]s, owning the key entropy source and session counter.
pub struct CommandBuilder<G> {
    rng: G,
    sequence: u32,
    academy_id: String,
    updated_by: Option<String>,
}

impl<G: RngCore> CommandBuilder<G> {
    pub fn new(rng: G, academy_id: &str, updated_by: Option<&str>) -> Self {
        Self {
            rng,
            sequence: 0,
            academy_id: academy_id.to_string(),
            updated_by: updated_by.map(ToString::to_string),
        }
    }

    /// A key distinct from every key this builder produced before.
    pub fn next_key(&mut self) -> IdempotencyKey {
        let mut bytes = [0u8; 16];
        self.rng.fill_bytes(&mut bytes);
        self.sequence = self.sequence.wrapping_add(1);
        bytes[12..].copy_from_slice(&self.sequence.to_be_bytes());
        IdempotencyKey(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    /// Builds a homework command for `item` (an item id or
    /// [`ALL_ITEMS`](crate::topics::ALL_ITEMS)).
    ///
    /// The topic is resolved first, so a command that could never be
    /// published consumes no key.
    pub fn homework(
        &mut self,
        topics: &Topics,
        action: HomeworkAction,
        student_id: &str,
        item: &str,
        issued_at: &str,
    ) -> Result<Command, CommandError> {
        let topic = topics.homework_command(student_id, item)?;
        Ok(Command {
            topic,
            action,
            academy_id: self.academy_id.clone(),
            student_id: student_id.to_string(),
            item_id: item.to_string(),
            idempotency_key: self.next_key(),
            issued_at: issued_at.to_string(),
            updated_by: self.updated_by.clone(),
        })
    }
}

/// Device-scoped request published to the device command topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeviceCommand<'a> {
    Bind { student_id: &'a str },
    Unbind,
    StudentInfo { student_id: &'a str },
    ListToday,
    ListHomeworks { student_id: &'a str },
    CheckUpdate,
}

impl DeviceCommand<'_> {
    pub fn payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::{Value, json};

    use super::*;
    use crate::config::DeviceIdentity;

    fn topics() -> Topics {
        Topics::new(&DeviceIdentity::new("acad", "dev", &[1]).unwrap())
    }

    /// An entropy source stuck on one value.
    struct Stuck;

    impl RngCore for Stuck {
        fn next_u32(&mut self) -> u32 {
            0
        }
        fn next_u64(&mut self) -> u64 {
            0
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0xAA);
        }
        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    #[test]
    fn keys_are_pairwise_distinct() {
        let mut builder = CommandBuilder::new(StdRng::seed_from_u64(7), "acad", None);
        let keys: HashSet<_> = (0..1000).map(|_| builder.next_key()).collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn keys_stay_distinct_with_degenerate_entropy() {
        let mut builder = CommandBuilder::new(Stuck, "acad", None);
        let a = builder.next_key();
        let b = builder.next_key();
        assert_ne!(a, b);
        assert_eq!(a.as_uuid().get_version_num(), 4);
        assert_eq!(a.to_string().len(), 36);
    }

    #[test]
    fn payload_is_stable_across_serializations() {
        let mut builder = CommandBuilder::new(StdRng::seed_from_u64(1), "acad", Some("kiosk"));
        let cmd = builder
            .homework(&topics(), HomeworkAction::Start, "s1", "h1", "2026-03-02T07:00:00Z")
            .unwrap();
        assert_eq!(cmd.payload().unwrap(), cmd.payload().unwrap());

        let body: Value = serde_json::from_slice(&cmd.payload().unwrap()).unwrap();
        assert_eq!(
            body,
            json!({
                "action": "start",
                "academy_id": "acad",
                "student_id": "s1",
                "item_id": "h1",
                "idempotency_key": cmd.idempotency_key().to_string(),
                "at": "2026-03-02T07:00:00Z",
                "updated_by": "kiosk",
            })
        );
        assert_eq!(cmd.topic(), "academies/acad/students/s1/homework/h1/command");
    }

    #[test]
    fn pause_all_targets_every_item() {
        let mut builder = CommandBuilder::new(StdRng::seed_from_u64(2), "acad", None);
        let cmd = builder
            .homework(&topics(), HomeworkAction::PauseAll, "s1", crate::topics::ALL_ITEMS, "")
            .unwrap();
        let body: Value = serde_json::from_slice(&cmd.payload().unwrap()).unwrap();
        assert_eq!(body["action"], "pause_all");
        assert_eq!(body["item_id"], "ALL");
        assert!(body.get("updated_by").is_none());
    }

    #[test]
    fn unroutable_command_is_refused() {
        let mut builder = CommandBuilder::new(StdRng::seed_from_u64(3), "acad", None);
        assert_eq!(
            builder.homework(&topics(), HomeworkAction::Start, "", "h1", ""),
            Err(CommandError::EmptyStudentId)
        );
        assert_eq!(builder.sequence, 0);
    }

    #[test]
    fn device_commands() {
        let cases = [
            (DeviceCommand::Bind { student_id: "s1" }, json!({"action":"bind","student_id":"s1"})),
            (DeviceCommand::Unbind, json!({"action":"unbind"})),
            (DeviceCommand::ListToday, json!({"action":"list_today"})),
            (
                DeviceCommand::ListHomeworks { student_id: "s1" },
                json!({"action":"list_homeworks","student_id":"s1"}),
            ),
            (DeviceCommand::CheckUpdate, json!({"action":"check_update"})),
        ];
        for (cmd, expected) in cases {
            let body: Value = serde_json::from_slice(&cmd.payload().unwrap()).unwrap();
            assert_eq!(body, expected);
        }
    }
}
