//! Variable scopes for one query invocation.
//!
//! Scopes are frames in an arena addressed by [`ScopeId`]. A frame holds its
//! own bindings and a handle to its parent; lookups walk outward. Frames are
//! reference counted by handle: a child retains its parent, and the last
//! [`DynamicContext::release`] frees the frame and releases the parent in
//! turn. Freed slots are reused by later frames; each reuse bumps the
//! slot's generation so handles to the freed frame stay stale.

use smallvec::SmallVec;

use crate::engine::runtime::{Error, ErrorCode, Result};
use crate::item::{Item, Name, Sequence};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId {
    slot: u32,
    generation: u32,
}

impl ScopeId {
    fn index(self) -> usize {
        self.slot as usize
    }
}

#[derive(Debug, Clone)]
struct Frame {
    parent: Option<ScopeId>,
    vars: SmallVec<[(Name, Sequence); 2]>,
    position: Option<i64>,
    refs: u32,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    frame: Option<Frame>,
}

#[derive(Debug, Clone)]
pub struct DynamicContext {
    frames: Vec<Slot>,
    free: Vec<u32>,
    root: ScopeId,
}

impl Default for DynamicContext {
    fn default() -> Self {
        Self::new()
    }
}

fn stale(scope: ScopeId) -> Error {
    Error::from_code(
        ErrorCode::ENGN0001,
        format!("scope handle {}/{} has been released", scope.slot, scope.generation),
    )
}

impl DynamicContext {
    /// A context with an empty root scope.
    pub fn new() -> Self {
        Self {
            frames: vec![Slot {
                generation: 0,
                frame: Some(Frame {
                    parent: None,
                    vars: SmallVec::new(),
                    position: None,
                    refs: 1,
                }),
            }],
            free: Vec::new(),
            root: ScopeId { slot: 0, generation: 0 },
        }
    }

    /// The scope holding externally bound variables.
    pub fn root(&self) -> ScopeId {
        self.root
    }

    fn live_frame_mut(&mut self, scope: ScopeId) -> Option<&mut Frame> {
        self.frames
            .get_mut(scope.index())
            .filter(|slot| slot.generation == scope.generation)
            .and_then(|slot| slot.frame.as_mut())
    }

    fn frame(&self, scope: ScopeId) -> Result<&Frame> {
        self.frames
            .get(scope.index())
            .filter(|slot| slot.generation == scope.generation)
            .and_then(|slot| slot.frame.as_ref())
            .ok_or_else(|| stale(scope))
    }

    fn frame_mut(&mut self, scope: ScopeId) -> Result<&mut Frame> {
        self.live_frame_mut(scope).ok_or_else(|| stale(scope))
    }

    /// Create a frame nested in `parent`. The returned handle is owned by the
    /// caller and must be released.
    pub fn child_scope(&mut self, parent: ScopeId) -> Result<ScopeId> {
        self.frame_mut(parent)?.refs += 1;
        let frame = Frame {
            parent: Some(parent),
            vars: SmallVec::new(),
            position: None,
            refs: 1,
        };
        let id = match self.free.pop().and_then(|slot| Some((slot, self.frames.get_mut(slot as usize)?))) {
            Some((slot, entry)) => {
                entry.frame = Some(frame);
                ScopeId {
                    slot,
                    generation: entry.generation,
                }
            }
            None => {
                let slot = u32::try_from(self.frames.len())
                    .map_err(|_| Error::from_code(ErrorCode::ENGN0001, "scope arena exhausted"))?;
                self.frames.push(Slot {
                    generation: 0,
                    frame: Some(frame),
                });
                ScopeId { slot, generation: 0 }
            }
        };
        Ok(id)
    }

    /// Take an additional handle on `scope`.
    pub fn retain(&mut self, scope: ScopeId) -> Result<()> {
        self.frame_mut(scope)?.refs += 1;
        Ok(())
    }

    /// Drop one handle on `scope`. Releasing a stale handle is a no-op, even
    /// when its slot now holds a newer frame.
    pub fn release(&mut self, scope: ScopeId) {
        let root = self.root;
        let mut next = Some(scope);
        while let Some(id) = next.take() {
            let Some(frame) = self.live_frame_mut(id) else {
                return;
            };
            frame.refs = frame.refs.saturating_sub(1);
            if frame.refs > 0 || id == root {
                return;
            }
            next = frame.parent;
            let slot = &mut self.frames[id.index()];
            slot.frame = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.slot);
        }
    }

    /// Introduce or shadow `name` in `scope`. Bindings in enclosing scopes are
    /// never touched.
    pub fn bind(&mut self, scope: ScopeId, name: impl Into<Name>, value: Sequence) -> Result<()> {
        let name = name.into();
        let frame = self.frame_mut(scope)?;
        match frame.vars.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => frame.vars.push((name, value)),
        }
        Ok(())
    }

    /// Innermost binding of `name` visible from `scope`.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Result<&Sequence> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let frame = self.frame(id)?;
            if let Some((_, value)) = frame.vars.iter().find(|(n, _)| n == name) {
                return Ok(value);
            }
            current = frame.parent;
        }
        Err(Error::from_code(
            ErrorCode::XPST0008,
            format!("Uninitialized variable reference: ${name}"),
        ))
    }

    pub fn set_position(&mut self, scope: ScopeId, position: i64) -> Result<()> {
        self.frame_mut(scope)?.position = Some(position);
        Ok(())
    }

    /// Position counter of the innermost scope that carries one.
    pub fn position(&self, scope: ScopeId) -> Option<i64> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let frame = self.frame(id).ok()?;
            if frame.position.is_some() {
                return frame.position;
            }
            current = frame.parent;
        }
        None
    }

    /// Flatten the bindings introduced between `scope` and its ancestor
    /// `base` (exclusive) into an owned tuple. Inner bindings shadow outer
    /// ones; the tuple lists variables in declaration order.
    pub fn snapshot(&self, scope: ScopeId, base: ScopeId) -> Result<Tuple> {
        self.flatten(scope, Some(base))
    }

    /// Every binding visible from `scope`, the root's included.
    pub fn environment(&self, scope: ScopeId) -> Result<Tuple> {
        self.flatten(scope, None)
    }

    fn flatten(&self, scope: ScopeId, base: Option<ScopeId>) -> Result<Tuple> {
        let mut chain = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            if Some(id) == base {
                break;
            }
            let frame = self.frame(id)?;
            chain.push(frame);
            current = frame.parent;
        }
        let mut tuple = Tuple::default();
        for frame in chain.into_iter().rev() {
            for (name, value) in &frame.vars {
                tuple.bind(name.clone(), value.clone());
            }
        }
        Ok(tuple)
    }

    /// Rebuild a tuple as a fresh child of `base`. The caller owns the
    /// returned handle.
    pub fn scope_from_tuple(&mut self, base: ScopeId, tuple: &Tuple) -> Result<ScopeId> {
        let scope = self.child_scope(base)?;
        for (name, value) in tuple.iter() {
            self.bind(scope, name.clone(), value.clone())?;
        }
        Ok(scope)
    }

    /// Number of frames currently alive, the root included.
    pub fn live_scopes(&self) -> usize {
        self.frames.iter().filter(|slot| slot.frame.is_some()).count()
    }
}

/// Owned variable bindings of one FLWOR tuple.
///
/// Unlike a [`ScopeId`], a tuple does not borrow from any context, so it can
/// be moved to another thread, encoded, sorted or grouped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tuple {
    bindings: Vec<(Name, Sequence)>,
}

impl Tuple {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name`, replacing an earlier binding of the same name in place.
    pub fn bind(&mut self, name: impl Into<Name>, value: Sequence) {
        let name = name.into();
        match self.bindings.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.bindings.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<Name>, value: Sequence) -> Self {
        self.bind(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Sequence> {
        self.bindings.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<Sequence> {
        let idx = self.bindings.iter().position(|(n, _)| n == name)?;
        Some(self.bindings.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &Sequence)> {
        self.bindings.iter().map(|(n, v)| (n, v))
    }
}

/// Builder for the [`DynamicContext`] a query is evaluated against.
pub struct DynamicContextBuilder {
    vars: Vec<(Name, Sequence)>,
}

impl Default for DynamicContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicContextBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    /// Bind an external variable in the root scope.
    pub fn with_variable(mut self, name: impl Into<Name>, value: impl Into<Sequence>) -> Self {
        self.vars.push((name.into(), value.into()));
        self
    }

    /// Bind an external variable to a single item.
    pub fn with_item(self, name: impl Into<Name>, item: impl Into<Item>) -> Self {
        self.with_variable(name, vec![item.into()])
    }

    pub fn build(self) -> DynamicContext {
        let mut ctx = DynamicContext::new();
        let root = ctx.root();
        for (name, value) in self.vars {
            if let Some(frame) = ctx.live_frame_mut(root) {
                match frame.vars.iter_mut().find(|(n, _)| *n == name) {
                    Some(slot) => slot.1 = value,
                    None => frame.vars.push((name, value)),
                }
            }
        }
        ctx
    }
}
