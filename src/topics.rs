//! Topic namespace and inbound routing.
//!
//! [`Topics`] derives every topic the kiosk uses from its [`DeviceIdentity`].
//! [`TopicRouter`] takes raw `(topic, fragment)` deliveries, reassembles them
//! per topic and turns completed messages into typed [`Inbound`] values.

use alloc::string::{String as AllocString, ToString};
use alloc::vec::Vec;

use heapless::String;

use crate::config::{DeviceIdentity, MAX_ID_LEN};
use crate::error::CommandError;
use crate::reassembly::{Fragment, Reassembly, ReassemblyBuffer};
use crate::schema::{self, DeviceAck, HomeworkItem, RosterEntry, StudentInfo, UpdateStatus};

/// Maximum length of any topic the kiosk publishes or subscribes to.
pub const MAX_TOPIC_LEN: usize = 192;

/// Item sentinel addressing every homework item of a student at once.
pub const ALL_ITEMS: &str = "ALL";

pub type Topic = String<MAX_TOPIC_LEN>;

/// Builds a topic from its parts. Ids are bounded by [`DeviceIdentity`], so
/// the device namespace always fits.
fn join(parts: &[&str]) -> Option<Topic> {
    let mut topic = Topic::new();
    for part in parts {
        topic.push_str(part).ok()?;
    }
    Some(topic)
}

/// Every topic derived from one device identity.
#[derive(Debug, Clone)]
pub struct Topics {
    academy_id: String<MAX_ID_LEN>,
    ack_filter: Topic,
    ack_prefix: Topic,
    students_today: Topic,
    homeworks: Topic,
    student_info: Topic,
    update: Topic,
    device_ack: Topic,
    presence: Topic,
    device_command: Topic,
}

impl Topics {
    pub fn new(identity: &DeviceIdentity) -> Self {
        let academy = identity.academy_id();
        let device = identity.device_id();
        let device_topic = |leaf: &str| {
            join(&["academies/", academy, "/devices/", device, "/", leaf]).unwrap_or_default()
        };
        Self {
            academy_id: String::try_from(academy).unwrap_or_default(),
            ack_filter: join(&["academies/", academy, "/ack/+"]).unwrap_or_default(),
            ack_prefix: join(&["academies/", academy, "/ack/"]).unwrap_or_default(),
            students_today: device_topic("students_today"),
            homeworks: device_topic("homeworks"),
            student_info: device_topic("student_info"),
            update: device_topic("update"),
            device_ack: device_topic("ack"),
            presence: device_topic("presence"),
            device_command: device_topic("command"),
        }
    }

    /// Topics to (re)subscribe after every connect.
    pub fn subscriptions(&self) -> [&str; 6] {
        [
            &self.ack_filter,
            &self.students_today,
            &self.homeworks,
            &self.student_info,
            &self.update,
            &self.device_ack,
        ]
    }

    pub fn presence(&self) -> &str {
        &self.presence
    }

    pub fn device_command(&self) -> &str {
        &self.device_command
    }

    pub fn students_today(&self) -> &str {
        &self.students_today
    }

    pub fn homeworks(&self) -> &str {
        &self.homeworks
    }

    /// `academies/{a}/students/{student}/homework/{item}/command`, where
    /// `item` is an item id or [`ALL_ITEMS`].
    pub fn homework_command(&self, student_id: &str, item: &str) -> Result<Topic, CommandError> {
        if student_id.is_empty() {
            return Err(CommandError::EmptyStudentId);
        }
        join(&[
            "academies/",
            &self.academy_id,
            "/students/",
            student_id,
            "/homework/",
            item,
            "/command",
        ])
        .ok_or(CommandError::TooLong)
    }
}

/// Exact-match inbound topics, each with its own reassembly buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Route {
    StudentsToday,
    Homeworks,
    StudentInfo,
    Update,
    DeviceAck,
}

impl Route {
    const ALL: [Route; 5] = [
        Route::StudentsToday,
        Route::Homeworks,
        Route::StudentInfo,
        Route::Update,
        Route::DeviceAck,
    ];

    fn topic(self, topics: &Topics) -> &str {
        match self {
            Route::StudentsToday => &topics.students_today,
            Route::Homeworks => &topics.homeworks,
            Route::StudentInfo => &topics.student_info,
            Route::Update => &topics.update,
            Route::DeviceAck => &topics.device_ack,
        }
    }

    fn parse(self, payload: &[u8]) -> Result<Inbound, crate::error::ParseError> {
        Ok(match self {
            Route::StudentsToday => Inbound::Roster(schema::parse_roster(payload)?),
            Route::Homeworks => Inbound::Homeworks(schema::parse_homeworks(payload)?),
            Route::StudentInfo => Inbound::StudentInfo(schema::parse_student_info(payload)?),
            Route::Update => Inbound::Update(schema::parse_update(payload)?),
            Route::DeviceAck => Inbound::DeviceAck(schema::parse_device_ack(payload)?),
        })
    }
}

/// A complete, schema-checked inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Roster(Vec<RosterEntry>),
    Homeworks(Vec<HomeworkItem>),
    StudentInfo(StudentInfo),
    Update(UpdateStatus),
    DeviceAck(DeviceAck),
    /// A per-command acknowledgement; `key` is the topic suffix after `ack/`.
    Ack {
        key: AllocString,
        payload: AllocString,
    },
}

/// Maps inbound deliveries to typed messages.
#[derive(Debug)]
pub struct TopicRouter {
    topics: Topics,
    buffers: [ReassemblyBuffer; 5],
}

impl TopicRouter {
    pub fn new(topics: Topics, max_message_len: usize) -> Self {
        Self {
            topics,
            buffers: core::array::from_fn(|_| ReassemblyBuffer::new(max_message_len)),
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Discards every partially received message.
    pub fn reset(&mut self) {
        for buffer in &mut self.buffers {
            if !buffer.is_idle() {
                debug!("router: discarding partial message on disconnect");
            }
            buffer.clear();
        }
    }

    /// Feeds one delivery. Returns a message once one is complete and valid;
    /// pending fragments, unknown topics and malformed payloads yield `None`.
    pub fn route(&mut self, topic: &str, fragment: &Fragment<'_>) -> Option<Inbound> {
        if let Some(key) = topic.strip_prefix(self.topics.ack_prefix.as_str()) {
            return Self::ack(key, fragment);
        }

        let Some(index) = Route::ALL
            .iter()
            .position(|route| route.topic(&self.topics) == topic)
        else {
            debug!("router: no handler for topic {}", topic);
            return None;
        };
        let route = Route::ALL[index];

        match self.buffers[index].push(fragment) {
            Reassembly::Pending => None,
            Reassembly::Dropped(reason) => {
                debug!("router: fragment on {:?} dropped: {:?}", route, reason);
                None
            }
            Reassembly::Complete(payload) => match route.parse(&payload) {
                Ok(inbound) => Some(inbound),
                Err(err) => {
                    warn!("router: malformed payload on {:?}: {:?}", route, err);
                    None
                }
            },
        }
    }

    fn ack(key: &str, fragment: &Fragment<'_>) -> Option<Inbound> {
        if key.is_empty() || key.contains('/') {
            debug!("router: ack topic with bad suffix");
            return None;
        }
        if !fragment.is_whole() {
            debug!("router: fragmented ack dropped");
            return None;
        }
        Some(Inbound::Ack {
            key: key.to_string(),
            payload: AllocString::from_utf8_lossy(fragment.data).into_owned(),
        })
    }
}
