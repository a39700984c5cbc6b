use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use embassy_time::Instant;
use kiosk_link::runtime::{MqttModule, PublishOutbox, TopicRegistry};
use kiosk_link::{
    Binding, CommandError, DeviceIdentity, DisconnectReason, Fragment, HomeworkItem, Kiosk,
    KioskConfig, LinkEvent, Phase, QoS, RenderSink, RosterEntry, StudentInfo, Storage, UiIntent,
    UiMode, WallClock,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;
use uuid::Uuid;

const DEVICE: &str = "academies/acad-7/devices/m5-001/";

#[derive(Default)]
struct MemStorage {
    values: BTreeMap<String, String>,
}

impl Storage for MemStorage {
    type Error = ();

    fn load(&mut self, key: &str) -> Result<Option<String>, ()> {
        Ok(self.values.get(key).cloned())
    }

    fn save(&mut self, key: &str, value: &str) -> Result<(), ()> {
        self.values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

#[derive(Default)]
struct Screen {
    mode: Option<UiMode>,
    roster: Vec<RosterEntry>,
    homeworks: Vec<HomeworkItem>,
    info: Option<StudentInfo>,
    elapsed: Vec<(String, u64)>,
    online: bool,
}

impl RenderSink for Screen {
    fn roster_changed(&mut self, roster: &[RosterEntry]) {
        self.roster = roster.to_vec();
    }

    fn homeworks_changed(&mut self, items: &[HomeworkItem]) {
        self.homeworks = items.to_vec();
    }

    fn student_info_changed(&mut self, info: &StudentInfo) {
        self.info = Some(info.clone());
    }

    fn mode_changed(&mut self, mode: UiMode) {
        self.mode = Some(mode);
    }

    fn connection_changed(&mut self, online: bool) {
        self.online = online;
    }

    fn elapsed_changed(&mut self, item_id: &str, seconds: u64) {
        self.elapsed.push((item_id.to_owned(), seconds));
    }
}

struct FixedClock(DateTime<Utc>);

impl WallClock for FixedClock {
    fn now_utc(&self) -> Option<DateTime<Utc>> {
        Some(self.0)
    }
}

#[derive(Default)]
struct Wire {
    published: Vec<(String, Value, QoS, bool)>,
}

impl PublishOutbox for Wire {
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) {
        let body = serde_json::from_slice(payload).expect("every publish is JSON");
        self.published.push((topic.to_owned(), body, qos, retain));
    }
}

impl Wire {
    fn take(&mut self) -> Vec<(String, Value, QoS, bool)> {
        std::mem::take(&mut self.published)
    }
}

type TestKiosk = Kiosk<MemStorage, Screen, StdRng, FixedClock>;

fn kiosk(storage: MemStorage) -> TestKiosk {
    let identity = DeviceIdentity::new("acad-7", "m5-001", &[0xA4, 0xCF, 0x12]).unwrap();
    let clock = FixedClock(Utc.with_ymd_and_hms(2026, 3, 2, 6, 30, 0).unwrap());
    Kiosk::new(
        KioskConfig::new(identity),
        storage,
        Screen::default(),
        StdRng::seed_from_u64(42),
        clock,
    )
}

fn at(millis: u64) -> Instant {
    Instant::from_millis(millis)
}

fn receive(kiosk: &mut TestKiosk, leaf: &str, payload: &str, now: Instant, wire: &mut Wire) {
    let topic = format!("{DEVICE}{leaf}");
    kiosk.on_event(
        LinkEvent::Message {
            topic: &topic,
            fragment: Fragment::whole(payload.as_bytes()),
        },
        now,
        wire,
    );
}

#[test]
fn unbound_boot_to_performing_homework() {
    let mut wire = Wire::default();
    let mut kiosk = kiosk(MemStorage::default());
    assert_eq!(kiosk.sink().mode, Some(UiMode::Roster));

    kiosk.on_event(LinkEvent::Connected, at(0), &mut wire);
    let hello = wire.take();
    assert_eq!(hello[0].0, format!("{DEVICE}presence"));
    assert_eq!(hello[0].1["online"], true);
    assert_eq!(hello[0].1["at"], "2026-03-02T06:30:00Z");
    assert!(hello[0].3);
    assert_eq!(hello[1].1["action"], "list_today");
    assert_eq!(hello[2].1["action"], "check_update");
    assert_eq!(hello.len(), 3);

    receive(
        &mut kiosk,
        "students_today",
        r#"{"students":[{"id":"s1","name":"Kim"}]}"#,
        at(100),
        &mut wire,
    );
    assert_eq!(kiosk.sink().roster.len(), 1);
    assert_eq!(kiosk.sink().roster[0].student_id.as_deref(), Some("s1"));
    assert_eq!(kiosk.sink().roster[0].name.as_deref(), Some("Kim"));

    kiosk.on_intent(UiIntent::SelectStudent("s1".into()), at(1_000), &mut wire);
    let bind = wire.take();
    assert_eq!(bind[0].0, format!("{DEVICE}command"));
    assert_eq!(bind[0].1["action"], "bind");
    assert_eq!(bind[0].1["student_id"], "s1");
    assert_eq!(kiosk.student_id(), Some("s1"));
    assert_eq!(kiosk.storage().values["student_id"], "s1");
    assert_eq!(kiosk.sink().mode, Some(UiMode::HomeworkPager));

    receive(
        &mut kiosk,
        "homeworks",
        r#"{"items":[{"item_id":"hw-9","title":"Fractions","phase":1,"accumulated":120}]}"#,
        at(2_000),
        &mut wire,
    );
    assert_eq!(kiosk.sink().homeworks[0].phase, Phase::Waiting);

    kiosk.on_intent(UiIntent::TapHomework("hw-9".into()), at(3_000), &mut wire);
    let start = wire.take();
    assert_eq!(start.len(), 1);
    let (topic, body, qos, retain) = &start[0];
    assert_eq!(topic, "academies/acad-7/students/s1/homework/hw-9/command");
    assert_eq!(*qos, QoS::AtLeastOnce);
    assert!(!retain);
    assert_eq!(body["action"], "start");
    assert_eq!(body["academy_id"], "acad-7");
    assert_eq!(body["item_id"], "hw-9");
    let key = Uuid::parse_str(body["idempotency_key"].as_str().unwrap()).unwrap();
    assert_eq!(key.get_version_num(), 4);

    receive(
        &mut kiosk,
        "homeworks",
        r#"{"items":[{"item_id":"hw-9","title":"Fractions","phase":2,"accumulated":120}]}"#,
        at(4_000),
        &mut wire,
    );
    assert_eq!(kiosk.sink().homeworks[0].phase, Phase::Performing);
    assert_eq!(kiosk.sink().elapsed, [("hw-9".to_owned(), 120)]);

    kiosk.on_tick(at(5_000), &mut wire);
    assert_eq!(kiosk.sink().elapsed.last(), Some(&("hw-9".to_owned(), 121)));
}

#[test]
fn restored_binding_repopulates_on_connect() {
    let mut storage = MemStorage::default();
    storage.save("student_id", "s1").unwrap();
    let mut kiosk = kiosk(storage);
    assert!(matches!(kiosk.homework().items(), []));
    assert_eq!(kiosk.sink().mode, Some(UiMode::HomeworkPager));

    let mut wire = Wire::default();
    kiosk.on_event(LinkEvent::Connected, at(0), &mut wire);
    let actions: Vec<_> = wire
        .take()
        .into_iter()
        .filter_map(|(_, body, _, _)| body["action"].as_str().map(str::to_owned))
        .collect();
    assert_eq!(actions, ["list_today", "check_update", "student_info", "list_homeworks"]);

    receive(
        &mut kiosk,
        "student_info",
        r#"{"info":{"name":"Kim","school":"Seoul Elementary","grade":4,"start_hour":15,"start_minute":30}}"#,
        at(50),
        &mut wire,
    );
    assert_eq!(kiosk.sink().info.as_ref().unwrap().grade, Some(4));
}

#[test]
fn fragmented_roster_completes_once() {
    let mut wire = Wire::default();
    let mut kiosk = kiosk(MemStorage::default());
    kiosk.on_event(LinkEvent::Connected, at(0), &mut wire);

    let payload = br#"[{"id":"s1","name":"Kim"},{"id":"s2","name":"Lee"}]"#;
    let topic = format!("{DEVICE}students_today");
    for offset in (0..payload.len()).step_by(16) {
        let end = (offset + 16).min(payload.len());
        kiosk.on_event(
            LinkEvent::Message {
                topic: &topic,
                fragment: Fragment {
                    offset,
                    total: payload.len(),
                    data: &payload[offset..end],
                },
            },
            at(10),
            &mut wire,
        );
        if end < payload.len() {
            assert!(kiosk.sink().roster.is_empty());
        }
    }
    assert_eq!(kiosk.sink().roster.len(), 2);
}

#[test]
fn offline_taps_never_reach_the_wire() {
    let mut storage = MemStorage::default();
    storage.save("student_id", "s1").unwrap();
    let mut kiosk = kiosk(storage);
    let mut wire = Wire::default();
    kiosk.on_event(LinkEvent::Connected, at(0), &mut wire);
    receive(
        &mut kiosk,
        "homeworks",
        r#"{"items":[{"item_id":"a","phase":1}]}"#,
        at(10),
        &mut wire,
    );
    kiosk.on_event(
        LinkEvent::Disconnected(DisconnectReason::KeepaliveTimeout),
        at(20),
        &mut wire,
    );
    wire.take();

    assert!(!kiosk.sink().online);
    assert_eq!(
        kiosk.tap_homework("a", at(1_000), &mut wire),
        Err(CommandError::Offline)
    );
    assert!(wire.published.is_empty());
    // Local state survives the disconnect.
    assert_eq!(kiosk.homework().items().len(), 1);
    assert_eq!(kiosk.binding(), &Binding::Bound("s1".into()));
}

#[test]
fn module_registers_topics_and_will() {
    let kiosk = kiosk(MemStorage::default());
    let mut registry = TopicRegistry::<8>::new();
    kiosk.register(&mut registry);
    let topics: Vec<_> = registry.iter().collect();
    assert!(topics.contains(&"academies/acad-7/ack/+"));
    assert!(topics.contains(&"academies/acad-7/devices/m5-001/homeworks"));

    let will = MqttModule::last_will(&kiosk).unwrap();
    assert_eq!(will.topic(), "academies/acad-7/devices/m5-001/presence");
    assert_eq!(will.payload(), br#"{"online":false,"at":""}"#);
}
