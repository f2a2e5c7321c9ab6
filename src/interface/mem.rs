// Client memory emulation and capability grants.
//
// A MemSpace stands in for one client process's address space: a byte buffer
// with per-page residency bits. Servers never see the buffer directly; they
// move data through grants, which scope access to one byte range with one
// permission. A speculative grant skips the page-in handshake and faults if
// any covered page is not resident; a direct grant is issued after the range
// has been paged in.

use crate::interface::{
    RustAtomicBool, RustAtomicOrdering, RustAtomicU64, RustHashMap, RustLazyGlobal, RustLock,
    RustRfc,
};
use thiserror::Error;

pub const PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GrantId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantAccess {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantKind {
    Speculative,
    Direct,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GrantError {
    #[error("no such grant")]
    NotFound,
    #[error("grant already revoked")]
    Revoked,
    #[error("grant access mode does not permit this operation")]
    Access,
    #[error("access outside granted range")]
    Bounds,
    #[error("granted memory not resident")]
    Fault,
}

#[derive(Clone)]
pub struct MemSpace {
    data: Vec<u8>,
    resident: Vec<bool>,
}

impl MemSpace {
    pub fn new(size: usize) -> MemSpace {
        let pages = size.div_ceil(PAGE_SIZE);
        MemSpace {
            data: vec![0; size],
            resident: vec![true; pages],
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn page_range(&self, start: usize, len: usize) -> std::ops::Range<usize> {
        let first = start / PAGE_SIZE;
        let last = (start + len).max(start + 1).div_ceil(PAGE_SIZE);
        first..last.min(self.resident.len())
    }

    pub fn page_in(&mut self, start: usize, len: usize) {
        for p in self.page_range(start, len) {
            self.resident[p] = true;
        }
    }

    /// Test hook standing in for the pager reclaiming frames.
    pub fn page_out(&mut self, start: usize, len: usize) {
        for p in self.page_range(start, len) {
            self.resident[p] = false;
        }
    }

    pub fn is_resident(&self, start: usize, len: usize) -> bool {
        self.page_range(start, len).all(|p| self.resident[p])
    }

    /// True when `[start, start+len)` lies inside this memory image. A range
    /// whose end overflows usize is out of bounds by definition.
    pub fn valid_range(&self, start: usize, len: usize) -> bool {
        start
            .checked_add(len)
            .map(|end| end <= self.data.len())
            .unwrap_or(false)
    }

    // The owning client touching its own memory pages it in as a side effect,
    // the way a real access would. A range outside the image is the client
    // naming a bad buffer; that is its error, never a panic in the core.
    pub fn write_bytes(&mut self, start: usize, buf: &[u8]) -> Result<(), GrantError> {
        if !self.valid_range(start, buf.len()) {
            return Err(GrantError::Bounds);
        }
        self.page_in(start, buf.len());
        self.data[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    pub fn read_bytes(&mut self, start: usize, len: usize) -> Result<Vec<u8>, GrantError> {
        if !self.valid_range(start, len) {
            return Err(GrantError::Bounds);
        }
        self.page_in(start, len);
        Ok(self.data[start..start + len].to_vec())
    }
}

struct GrantEntry {
    mem: RustRfc<RustLock<MemSpace>>,
    start: usize,
    len: usize,
    access: GrantAccess,
    kind: GrantKind,
    revoked: RustAtomicBool,
}

static GRANT_TABLE: RustLazyGlobal<RustHashMap<u64, RustRfc<GrantEntry>>> =
    RustLazyGlobal::new(RustHashMap::new);

static NEXT_GRANT: RustAtomicU64 = RustAtomicU64::new(1);

/// Owning handle for an issued grant. Not Clone: revocation consumes the
/// handle, so the type system enforces the exactly-once revoke discipline.
#[derive(Debug)]
pub struct Grant {
    id: GrantId,
    revoked: bool,
}

impl Grant {
    pub fn id(&self) -> GrantId {
        self.id
    }
}

impl Drop for Grant {
    fn drop(&mut self) {
        if !self.revoked {
            // a leaked grant is a bug in the owning operation, not in the
            // grant layer; flag it loudly but do not abort release builds
            debug_assert!(self.revoked, "grant dropped without revocation");
            log::warn!("grant {:?} dropped without revocation", self.id);
            GRANT_TABLE.remove(&self.id.0);
        }
    }
}

/// Issues a grant over `mem[start..start+len]`. The range must lie inside
/// the client's memory image; a grant can never widen what a server may
/// touch. For Direct grants the range is paged in first; Speculative grants
/// leave residency untouched.
pub fn set_grant(
    mem: &RustRfc<RustLock<MemSpace>>,
    start: usize,
    len: usize,
    access: GrantAccess,
    kind: GrantKind,
) -> Result<Grant, GrantError> {
    if !mem.read().valid_range(start, len) {
        return Err(GrantError::Bounds);
    }
    if kind == GrantKind::Direct {
        mem.write().page_in(start, len);
    }
    let id = NEXT_GRANT.fetch_add(1, RustAtomicOrdering::Relaxed);
    GRANT_TABLE.insert(
        id,
        RustRfc::new(GrantEntry {
            mem: mem.clone(),
            start,
            len,
            access,
            kind,
            revoked: RustAtomicBool::new(false),
        }),
    );
    Ok(Grant {
        id: GrantId(id),
        revoked: false,
    })
}

/// Revokes a grant. Consumes the handle; any later server access fails with
/// GrantError::Revoked.
pub fn revoke_grant(mut grant: Grant) {
    if let Some((_, entry)) = GRANT_TABLE.remove(&grant.id.0) {
        entry.revoked.store(true, RustAtomicOrdering::SeqCst);
    }
    grant.revoked = true;
}

fn lookup_entry(id: GrantId) -> Result<RustRfc<GrantEntry>, GrantError> {
    let entry = GRANT_TABLE
        .get(&id.0)
        .map(|e| e.value().clone())
        .ok_or(GrantError::NotFound)?;
    if entry.revoked.load(RustAtomicOrdering::SeqCst) {
        return Err(GrantError::Revoked);
    }
    Ok(entry)
}

/// Server-side copy out of a client's memory through a read grant.
pub fn copy_from_grant(id: GrantId, offset: usize, len: usize) -> Result<Vec<u8>, GrantError> {
    let entry = lookup_entry(id)?;
    if entry.access != GrantAccess::Read {
        return Err(GrantError::Access);
    }
    if offset + len > entry.len {
        return Err(GrantError::Bounds);
    }
    let mut mem = entry.mem.write();
    if !mem.is_resident(entry.start + offset, len) {
        // a direct grant went through the full handshake and is backed, the
        // speculative fast path surfaces the fault to the requester instead
        if entry.kind == GrantKind::Speculative {
            return Err(GrantError::Fault);
        }
        mem.page_in(entry.start + offset, len);
    }
    Ok(mem.data[entry.start + offset..entry.start + offset + len].to_vec())
}

/// Server-side copy into a client's memory through a write grant.
pub fn copy_to_grant(id: GrantId, offset: usize, buf: &[u8]) -> Result<(), GrantError> {
    let entry = lookup_entry(id)?;
    if entry.access != GrantAccess::Write {
        return Err(GrantError::Access);
    }
    if offset + buf.len() > entry.len {
        return Err(GrantError::Bounds);
    }
    let mut mem = entry.mem.write();
    if !mem.is_resident(entry.start + offset, buf.len()) {
        if entry.kind == GrantKind::Speculative {
            return Err(GrantError::Fault);
        }
        mem.page_in(entry.start + offset, buf.len());
    }
    let start = entry.start + offset;
    mem.data[start..start + buf.len()].copy_from_slice(buf);
    Ok(())
}

/// Number of live (unrevoked) grants; test observability.
pub fn live_grants() -> usize {
    GRANT_TABLE.len()
}
