// Tri-state lock used on every vnode and mount entry.
//
// Three strengths are exposed: many concurrent readers, a single upgradable
// reader that can escalate in place, and a single exclusive writer. A logical
// call that re-acquires a lock it already owns degrades to a "soft" reference
// instead of deadlocking; the soft holder never performs the final unlock.

use crate::interface::{RustCondvar, RustMutex};
use thiserror::Error;

/// Identity of one logical call as it moves between workers. Lock ownership is
/// tracked per call, not per thread, so a suspended and revived call keeps its
/// locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockStrength {
    Read,
    Upgradable,
    Exclusive,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("lock is busy")]
    Busy,
    #[error("acquisition would self-deadlock")]
    Deadlock,
}

#[derive(Debug)]
struct Owner {
    call: CallId,
    soft: u32,
}

#[derive(Debug, Default)]
struct TriState {
    readers: u32,
    upgradable: Option<Owner>,
    exclusive: Option<Owner>,
    // set while the upgradable holder waits for readers to drain, fences out
    // new readers so the upgrade cannot starve
    upgrading: bool,
}

impl Default for TriLock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TriLock {
    state: RustMutex<TriState>,
    cv: RustCondvar,
}

impl TriLock {
    pub fn new() -> TriLock {
        TriLock {
            state: RustMutex::new(TriState {
                readers: 0,
                upgradable: None,
                exclusive: None,
                upgrading: false,
            }),
            cv: RustCondvar::new(),
        }
    }

    fn owned_by(st: &TriState, call: CallId) -> bool {
        st.exclusive.as_ref().map(|o| o.call) == Some(call)
            || st.upgradable.as_ref().map(|o| o.call) == Some(call)
    }

    fn add_soft(st: &mut TriState, call: CallId) {
        if let Some(o) = st.exclusive.as_mut() {
            if o.call == call {
                o.soft += 1;
                return;
            }
        }
        if let Some(o) = st.upgradable.as_mut() {
            if o.call == call {
                o.soft += 1;
                return;
            }
        }
        unreachable!();
    }

    fn grantable(st: &TriState, strength: LockStrength) -> bool {
        match strength {
            LockStrength::Read => st.exclusive.is_none() && !st.upgrading,
            LockStrength::Upgradable => st.exclusive.is_none() && st.upgradable.is_none(),
            LockStrength::Exclusive => {
                st.exclusive.is_none() && st.upgradable.is_none() && st.readers == 0
            }
        }
    }

    fn grant(st: &mut TriState, call: CallId, strength: LockStrength) {
        match strength {
            LockStrength::Read => st.readers += 1,
            LockStrength::Upgradable => st.upgradable = Some(Owner { call, soft: 0 }),
            LockStrength::Exclusive => st.exclusive = Some(Owner { call, soft: 0 }),
        }
    }

    /// Blocks until the lock is granted at the requested strength. Re-entry by
    /// the owning call is granted immediately as a soft reference.
    pub fn lock(&self, call: CallId, strength: LockStrength) {
        let mut st = self.state.lock();
        if Self::owned_by(&st, call) {
            Self::add_soft(&mut st, call);
            return;
        }
        while !Self::grantable(&st, strength) {
            self.cv.wait(&mut st);
        }
        Self::grant(&mut st, call, strength);
    }

    /// Non-blocking variant; used where blocking could wedge the dispatch
    /// loop. Never waits, reports Busy instead.
    pub fn try_lock(&self, call: CallId, strength: LockStrength) -> Result<(), LockError> {
        let mut st = self.state.lock();
        if Self::owned_by(&st, call) {
            Self::add_soft(&mut st, call);
            return Ok(());
        }
        if !Self::grantable(&st, strength) {
            return Err(LockError::Busy);
        }
        Self::grant(&mut st, call, strength);
        Ok(())
    }

    /// Escalates the calling call's upgradable hold to exclusive without a
    /// release window. Panics if the call does not hold the upgradable lock.
    pub fn upgrade(&self, call: CallId) {
        let mut st = self.state.lock();
        match st.upgradable.as_ref() {
            Some(o) if o.call == call => {}
            _ => panic!("upgrade of tri-state lock without an upgradable hold"),
        }
        st.upgrading = true;
        while st.readers > 0 || st.exclusive.is_some() {
            self.cv.wait(&mut st);
        }
        let owner = st.upgradable.take().unwrap();
        st.exclusive = Some(owner);
        st.upgrading = false;
    }

    /// Non-blocking upgrade; leaves the upgradable hold untouched on Busy.
    pub fn try_upgrade(&self, call: CallId) -> Result<(), LockError> {
        let mut st = self.state.lock();
        match st.upgradable.as_ref() {
            Some(o) if o.call == call => {}
            _ => panic!("upgrade of tri-state lock without an upgradable hold"),
        }
        if st.readers > 0 || st.exclusive.is_some() {
            return Err(LockError::Busy);
        }
        let owner = st.upgradable.take().unwrap();
        st.exclusive = Some(owner);
        Ok(())
    }

    /// Reduces the calling call's hold in place. Exclusive may drop to
    /// upgradable or read, upgradable to read. Dropping to read requires that
    /// no soft references remain, since read holds carry no owner identity.
    pub fn downgrade(&self, call: CallId, to: LockStrength) {
        let mut st = self.state.lock();
        let owner = if st.exclusive.as_ref().map(|o| o.call) == Some(call) {
            st.exclusive.take().unwrap()
        } else if st.upgradable.as_ref().map(|o| o.call) == Some(call) {
            st.upgradable.take().unwrap()
        } else {
            panic!("downgrade of tri-state lock not held by this call");
        };
        match to {
            LockStrength::Upgradable => {
                if st.upgradable.is_some() {
                    panic!("downgrade collided with another upgradable holder");
                }
                st.upgradable = Some(owner);
            }
            LockStrength::Read => {
                if owner.soft != 0 {
                    panic!("downgrade to read with outstanding soft references");
                }
                st.readers += 1;
            }
            LockStrength::Exclusive => panic!("downgrade cannot raise strength"),
        }
        self.cv.notify_all();
    }

    /// Releases one hold. A soft reference is peeled off first; the final
    /// unlock is always performed by the primary holder. Unlocking an entity
    /// that is not held is a programming error and aborts.
    pub fn unlock(&self, call: CallId) {
        let mut st = self.state.lock();
        if let Some(o) = st.exclusive.as_mut() {
            if o.call == call {
                if o.soft > 0 {
                    o.soft -= 1;
                    return;
                }
                st.exclusive = None;
                self.cv.notify_all();
                return;
            }
        }
        if let Some(o) = st.upgradable.as_mut() {
            if o.call == call {
                if o.soft > 0 {
                    o.soft -= 1;
                    return;
                }
                st.upgradable = None;
                self.cv.notify_all();
                return;
            }
        }
        if st.readers == 0 {
            panic!("unlock of tri-state lock not held");
        }
        st.readers -= 1;
        self.cv.notify_all();
    }

    /// True when no holder of any strength exists.
    pub fn is_free(&self) -> bool {
        let st = self.state.lock();
        st.readers == 0 && st.upgradable.is_none() && st.exclusive.is_none()
    }

    /// True when some call holds the exclusive strength.
    pub fn is_exclusive(&self) -> bool {
        self.state.lock().exclusive.is_some()
    }
}

impl std::fmt::Debug for TriLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock();
        f.debug_struct("TriLock")
            .field("readers", &st.readers)
            .field("upgradable", &st.upgradable)
            .field("exclusive", &st.exclusive)
            .finish()
    }
}
