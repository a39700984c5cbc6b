//! Device to student binding.
//!
//! The binding decides the UI mode: an unbound kiosk shows today's roster, a
//! bound one shows the student's homework pager. It is persisted on every
//! change and restored at boot, so a power cycle lands back in the same mode.

use alloc::string::{String, ToString};

use crate::error::CommandError;

/// Storage key holding the bound student id; an empty value means unbound.
pub const BINDING_KEY: &str = "student_id";

/// Small key/value persistence. Each call is one discrete read or write;
/// implementations must not keep a handle open between calls.
pub trait Storage {
    type Error: core::fmt::Debug;

    fn load(&mut self, key: &str) -> Result<Option<String>, Self::Error>;

    fn save(&mut self, key: &str, value: &str) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UiMode {
    /// Roster of students expected today, waiting for a selection.
    Roster,
    /// Homework cards of the bound student.
    HomeworkPager,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Binding {
    #[default]
    Unbound,
    Bound(String),
}

impl Binding {
    pub fn student_id(&self) -> Option<&str> {
        match self {
            Binding::Unbound => None,
            Binding::Bound(id) => Some(id),
        }
    }

    pub fn mode(&self) -> UiMode {
        match self {
            Binding::Unbound => UiMode::Roster,
            Binding::Bound(_) => UiMode::HomeworkPager,
        }
    }
}

pub struct BindingManager<S> {
    storage: S,
    binding: Binding,
}

impl<S: Storage> BindingManager<S> {
    /// Loads the persisted binding. Unreadable storage boots unbound.
    pub fn restore(mut storage: S) -> Self {
        let binding = match storage.load(BINDING_KEY) {
            Ok(Some(id)) if !id.is_empty() => {
                info!("binding: restored bound student");
                Binding::Bound(id)
            }
            Ok(_) => Binding::Unbound,
            Err(err) => {
                error!("binding: failed to load: {:?}", crate::fmt::dbg(&err));
                Binding::Unbound
            }
        };
        Self { storage, binding }
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn student_id(&self) -> Option<&str> {
        self.binding.student_id()
    }

    pub fn mode(&self) -> UiMode {
        self.binding.mode()
    }

    /// Binds `student_id`, replacing any previous binding, and persists it.
    ///
    /// The in-memory binding changes even if the write fails; the next
    /// successful change overwrites the stale value.
    pub fn bind(&mut self, student_id: &str) -> Result<(), CommandError> {
        if student_id.is_empty() {
            return Err(CommandError::EmptyStudentId);
        }
        self.binding = Binding::Bound(student_id.to_string());
        self.persist(student_id);
        Ok(())
    }

    /// Clears the binding and persists the cleared state. Returns the
    /// student that was bound, if any.
    pub fn unbind(&mut self) -> Option<String> {
        match core::mem::take(&mut self.binding) {
            Binding::Unbound => None,
            Binding::Bound(id) => {
                self.persist("");
                Some(id)
            }
        }
    }

    fn persist(&mut self, value: &str) {
        if let Err(err) = self.storage.save(BINDING_KEY, value) {
            error!("binding: failed to persist: {:?}", crate::fmt::dbg(&err));
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }
}
