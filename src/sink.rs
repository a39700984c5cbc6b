//! The UI collaborator.
//!
//! Rendering lives outside this crate. The kiosk pushes every state change
//! it makes through [`RenderSink`]; the three list/detail notifications are
//! mandatory, everything else defaults to a no-op.

use crate::binding::UiMode;
use crate::error::CommandError;
use crate::schema::{DeviceAck, HomeworkItem, RosterEntry, StudentInfo, UpdateStatus};

pub trait RenderSink {
    fn roster_changed(&mut self, roster: &[RosterEntry]);

    fn homeworks_changed(&mut self, items: &[HomeworkItem]);

    fn student_info_changed(&mut self, info: &StudentInfo);

    /// Switch between the roster and the homework pager.
    fn mode_changed(&mut self, _mode: UiMode) {}

    /// Broker session came up or went down.
    fn connection_changed(&mut self, _online: bool) {}

    fn elapsed_changed(&mut self, _item_id: &str, _seconds: u64) {}

    /// One short alert (vibration, flash) for an item awaiting confirmation.
    fn attention_pulse(&mut self, _item_id: &str) {}

    /// The backend acknowledged the homework command with this key.
    fn acknowledged(&mut self, _key: &str, _payload: &str) {}

    fn device_ack(&mut self, _ack: &DeviceAck) {}

    /// The backend refused a bind. The local binding is left as it is.
    fn bind_rejected(&mut self, _student_id: Option<&str>, _error: Option<&str>) {}

    fn update_status(&mut self, _status: &UpdateStatus) {}

    /// A queued UI intent was refused locally.
    fn command_rejected(&mut self, _error: CommandError) {}

    /// Logout accepted; show the goodbye screen until the restart.
    fn farewell(&mut self) {}

    /// Time to restart the device for a clean state.
    fn request_restart(&mut self) {}
}

impl<R: RenderSink + ?Sized> RenderSink for &mut R {
    fn roster_changed(&mut self, roster: &[RosterEntry]) {
        (**self).roster_changed(roster)
    }

    fn homeworks_changed(&mut self, items: &[HomeworkItem]) {
        (**self).homeworks_changed(items)
    }

    fn student_info_changed(&mut self, info: &StudentInfo) {
        (**self).student_info_changed(info)
    }

    fn mode_changed(&mut self, mode: UiMode) {
        (**self).mode_changed(mode)
    }

    fn connection_changed(&mut self, online: bool) {
        (**self).connection_changed(online)
    }

    fn elapsed_changed(&mut self, item_id: &str, seconds: u64) {
        (**self).elapsed_changed(item_id, seconds)
    }

    fn attention_pulse(&mut self, item_id: &str) {
        (**self).attention_pulse(item_id)
    }

    fn acknowledged(&mut self, key: &str, payload: &str) {
        (**self).acknowledged(key, payload)
    }

    fn device_ack(&mut self, ack: &DeviceAck) {
        (**self).device_ack(ack)
    }

    fn bind_rejected(&mut self, student_id: Option<&str>, error: Option<&str>) {
        (**self).bind_rejected(student_id, error)
    }

    fn update_status(&mut self, status: &UpdateStatus) {
        (**self).update_status(status)
    }

    fn command_rejected(&mut self, error: CommandError) {
        (**self).command_rejected(error)
    }

    fn farewell(&mut self) {
        (**self).farewell()
    }

    fn request_restart(&mut self) {
        (**self).request_restart()
    }
}
