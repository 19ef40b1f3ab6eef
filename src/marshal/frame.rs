use std::ffi::c_void;
use std::fmt;
use std::ptr;

use enginelink_core::variant::{decode, encode_handle};
use enginelink_core::{
    CallError, Handle, MAX_ARGS, MAX_HANDLE_WORDS, NativeValue, Ownership, OwnershipKind, Payload,
    RawWords, ScopeId, SlotKind, TypeTag, Variant, WORD,
};
use enginelink_registry::{Arena, HandleRegistry};

use super::signature::{CallSpec, Entry, ReturnSpec};
use super::storage::SlotStorage;
use super::value::{RawValue, ReturnValue};
use super::{Marshaller, Phase};
use crate::error::MarshalDefect;

/// One native call in flight.
///
/// Every operation has a `try_` form returning the defect and a plain form
/// that reports it through the marshaller's policy and carries on with a
/// neutral value. Dropping a frame ends it.
pub struct Frame<'m> {
    marshaller: &'m Marshaller,
    spec: CallSpec,
    storage: SlotStorage,
    /// Word offset of each argument slot; the entry after the last
    /// argument is the return slot.
    offsets: [u16; MAX_ARGS + 1],
    written: u16,
    receiver: Option<Handle>,
    receiver_words: [usize; MAX_HANDLE_WORDS],
    /// Scope Borrowed returns bind to when the frame was opened in one.
    outer: Option<ScopeId>,
    /// Opened on first use for transient arguments or Borrowed returns.
    arena: Option<Arena<'m>>,
    /// Written by a variant call.
    call_error: Option<CallError>,
    phase: Phase,
}

impl<'m> Frame<'m> {
    pub(super) fn new(marshaller: &'m Marshaller, spec: CallSpec, outer: Option<ScopeId>) -> Self {
        let shape = spec.shape();
        let mut offsets = [0u16; MAX_ARGS + 1];
        let mut word = 0;
        for (offset, kind) in offsets.iter_mut().zip(shape.args()) {
            *offset = word as u16;
            word += kind.words();
        }
        offsets[shape.arg_count()] = word as u16;

        Self {
            marshaller,
            spec,
            storage: SlotStorage::new(shape.frame_words()),
            offsets,
            written: 0,
            receiver: None,
            receiver_words: [0; MAX_HANDLE_WORDS],
            outer,
            arena: None,
            call_error: None,
            phase: Phase::Unopened,
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    pub fn spec(&self) -> &CallSpec {
        &self.spec
    }

    #[inline]
    pub fn receiver(&self) -> Option<&Handle> {
        self.receiver.as_ref()
    }

    /// The error record of an invoked vararg call, exactly as the native
    /// side wrote it. `None` for pointer calls and before invoke.
    #[inline]
    pub fn call_error(&self) -> Option<CallError> {
        self.call_error
    }

    /// The bytes of argument slot `index`, padding included.
    pub fn slot_bytes(&self, index: usize) -> Option<&[u8]> {
        let kind = self.spec.shape().arg(index)?;
        Some(self.storage.bytes(self.offsets[index] as usize, kind.words() * WORD))
    }

    /// Byte offset of argument slot `index` from the start of the frame.
    pub fn slot_offset(&self, index: usize) -> Option<usize> {
        self.spec.shape().arg(index)?;
        Some(self.offsets[index] as usize * WORD)
    }

    /// The bytes of the return slot.
    pub fn return_bytes(&self) -> &[u8] {
        let kind = self.spec.shape().ret();
        self.storage.bytes(self.ret_word(), kind.words() * WORD)
    }

    // ------------------------------------------------------------------
    // Receiver
    // ------------------------------------------------------------------

    /// Sets the object the method is called on.
    pub fn with_receiver(mut self, receiver: &Handle) -> Self {
        if let Err(defect) = self.try_set_receiver(receiver) {
            self.marshaller.report(&defect);
        }
        self
    }

    pub fn try_set_receiver(&mut self, receiver: &Handle) -> Result<(), MarshalDefect> {
        self.expect_phase("set_receiver", &[Phase::Unopened, Phase::Populated])?;
        self.registry().try_borrow(receiver)?;
        self.receiver = Some(*receiver);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Arguments
    // ------------------------------------------------------------------

    /// Writes a plain value into argument slot `index`. Exactly
    /// `T::KIND.size()` bytes are written.
    pub fn try_put<T: NativeValue>(&mut self, index: usize, value: T) -> Result<(), MarshalDefect> {
        let (word, _) = self.arg_slot("put", index, T::KIND)?;
        self.storage.write(word, value);
        self.mark_written(index);
        Ok(())
    }

    pub fn put<T: NativeValue>(&mut self, index: usize, value: T) -> &mut Self {
        if let Err(defect) = self.try_put(index, value) {
            self.marshaller.report(&defect);
        }
        self
    }

    /// Writes the raw words of a live handle. The handle's ownership is
    /// unchanged.
    pub fn try_put_handle(&mut self, index: usize, handle: &Handle) -> Result<(), MarshalDefect> {
        let (word, kind) = self.arg_slot("put_handle", index, handle_kind(handle.tag()))?;
        let raw = self.registry().try_borrow(handle)?;
        let width = raw.len().min(kind.words());
        self.storage.write_words(word, &raw.as_slice()[..width]);
        self.mark_written(index);
        Ok(())
    }

    pub fn put_handle(&mut self, index: usize, handle: &Handle) -> &mut Self {
        if let Err(defect) = self.try_put_handle(index, handle) {
            self.marshaller.report(&defect);
        }
        self
    }

    /// Writes a variant in its three-word slot encoding.
    pub fn try_put_variant(&mut self, index: usize, variant: &Variant) -> Result<(), MarshalDefect> {
        let (word, _) = self.arg_slot("put_variant", index, SlotKind::Word3)?;
        let words = match variant.handle() {
            Some(handle) => encode_handle(handle.tag(), &self.registry().try_borrow(handle)?),
            None => variant.encode_value().unwrap_or_default(),
        };
        self.storage.write_words(word, &words);
        self.mark_written(index);
        Ok(())
    }

    pub fn put_variant(&mut self, index: usize, variant: &Variant) -> &mut Self {
        if let Err(defect) = self.try_put_variant(index, variant) {
            self.marshaller.report(&defect);
        }
        self
    }

    /// Creates a native string for the call. It is destroyed when the frame
    /// ends, so the callee must copy anything it keeps.
    #[track_caller]
    pub fn try_put_str(&mut self, index: usize, text: &str) -> Result<(), MarshalDefect> {
        let (word, _) = self.arg_slot("put_str", index, SlotKind::Word1)?;
        let raw = self.registry().runtime().new_string(text);
        self.arena().adopt(raw, TypeTag::String);
        self.storage.write_words(word, &raw.as_slice()[..1]);
        self.mark_written(index);
        Ok(())
    }

    #[track_caller]
    pub fn put_str(&mut self, index: usize, text: &str) -> &mut Self {
        if let Err(defect) = self.try_put_str(index, text) {
            self.marshaller.report(&defect);
        }
        self
    }

    /// Passes `text` as a pointer to a NUL-terminated C string that lives
    /// until the frame ends.
    pub fn try_put_cstr(&mut self, index: usize, text: &str) -> Result<(), MarshalDefect> {
        let (word, _) = self.arg_slot("put_cstr", index, SlotKind::Word1)?;
        let text = self.arena().alloc_cstr(text).as_ptr() as usize;
        self.storage.write_words(word, &[text]);
        self.mark_written(index);
        Ok(())
    }

    pub fn put_cstr(&mut self, index: usize, text: &str) -> &mut Self {
        if let Err(defect) = self.try_put_cstr(index, text) {
            self.marshaller.report(&defect);
        }
        self
    }

    // ------------------------------------------------------------------
    // Invoke
    // ------------------------------------------------------------------

    /// Calls the native function. Every argument must have been written.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn try_invoke(&mut self) -> Result<(), MarshalDefect> {
        self.expect_phase("invoke", &[Phase::Unopened, Phase::Populated])?;
        let argc = self.spec.arg_count();
        if let Some(index) = (0..argc).find(|index| self.written & (1 << index) == 0) {
            return Err(MarshalDefect::MissingArgument { index });
        }
        let base = self.receiver_ptr()?;

        let frame = self.storage.as_mut_ptr();
        let mut args = [ptr::null::<c_void>(); MAX_ARGS];
        // SAFETY: every offset lies within the storage allocated for the shape.
        unsafe {
            for (arg, offset) in args.iter_mut().zip(&self.offsets[..argc]) {
                *arg = frame.add(*offset as usize * WORD).cast_const().cast();
            }
        }
        let ret = match self.spec.shape().ret() {
            SlotKind::Void => ptr::null_mut(),
            // SAFETY: as above.
            _ => unsafe { frame.add(self.ret_word() * WORD).cast::<c_void>() },
        };

        log::trace!("invoke {:?} with {argc} args", self.spec.shape());
        // SAFETY: the binding metadata pairs this entry point with the shape
        // the frame was laid out for.
        match self.spec.entry() {
            Entry::Ptr(call) => unsafe { call(base, args.as_ptr(), ret, argc as i64) },
            Entry::Var(call) => {
                let mut error = CallError::default();
                unsafe { call(base, args.as_ptr(), argc as i64, ret, &mut error) };
                if !error.is_ok() {
                    log::debug!("vararg call reported {error:?}");
                }
                self.call_error = Some(error);
            }
        }
        self.phase = Phase::Invoked;
        Ok(())
    }

    /// See [`try_invoke`](Self::try_invoke). On a defect the native function
    /// is not called.
    pub fn invoke(&mut self) {
        if let Err(defect) = self.try_invoke() {
            self.marshaller.report(&defect);
        }
    }

    // ------------------------------------------------------------------
    // Return
    // ------------------------------------------------------------------

    /// Copies a plain return value out of the return slot.
    pub fn try_read<T: NativeValue>(&mut self) -> Result<T, MarshalDefect> {
        self.expect_phase("read", &[Phase::Invoked])?;
        let declared = self.spec.ret();
        let fits = match declared {
            ReturnSpec::Value(kind) if kind == T::KIND => true,
            ReturnSpec::Value(kind) => {
                !self.marshaller.config().verify_kinds && T::KIND.size() <= kind.words() * WORD
            }
            _ => false,
        };
        if !fits {
            return Err(MarshalDefect::ReturnMismatch {
                declared,
                requested: "value",
            });
        }
        self.phase = Phase::Consumed;
        Ok(self.storage.read(self.ret_word()))
    }

    pub fn read<T: NativeValue>(&mut self) -> T {
        match self.try_read() {
            Ok(value) => value,
            Err(defect) => {
                self.marshaller.report(&defect);
                // SAFETY: all-zero is a valid bit pattern for every NativeValue.
                unsafe { std::mem::zeroed() }
            }
        }
    }

    /// Registers a handle return under the function's ownership contract.
    /// A null return yields `None`.
    #[track_caller]
    pub fn try_read_handle(&mut self) -> Result<Option<Handle>, MarshalDefect> {
        self.expect_phase("read_handle", &[Phase::Invoked])?;
        let ReturnSpec::Handle { tag, contract } = self.spec.ret() else {
            return Err(MarshalDefect::ReturnMismatch {
                declared: self.spec.ret(),
                requested: "handle",
            });
        };

        let width = usize::from(tag.handle_width().unwrap_or(1));
        let mut words = [0usize; MAX_HANDLE_WORDS];
        self.storage.read_words(self.ret_word(), &mut words[..width]);
        self.phase = Phase::Consumed;

        let raw = RawWords::from_slice(&words[..width]).unwrap_or_default();
        if raw.is_null() {
            return Ok(None);
        }
        self.bind(raw, tag, contract).map(Some)
    }

    #[track_caller]
    pub fn read_handle(&mut self) -> Option<Handle> {
        match self.try_read_handle() {
            Ok(handle) => handle,
            Err(defect) => {
                self.marshaller.report(&defect);
                None
            }
        }
    }

    /// Decodes a variant return. A handle it carries is registered under the
    /// function's ownership contract; a null one decodes as `Nil`.
    #[track_caller]
    pub fn try_read_variant(&mut self) -> Result<Variant, MarshalDefect> {
        self.expect_phase("read_variant", &[Phase::Invoked])?;
        let ReturnSpec::Variant { contract } = self.spec.ret() else {
            return Err(MarshalDefect::ReturnMismatch {
                declared: self.spec.ret(),
                requested: "variant",
            });
        };

        let mut words = [0usize; 3];
        self.storage.read_words(self.ret_word(), &mut words);
        self.phase = Phase::Consumed;

        match decode(&words)? {
            Payload::Value(variant) => Ok(variant),
            Payload::Handle(_, raw) if raw.is_null() => Ok(Variant::Nil),
            Payload::Handle(tag, raw) => {
                let handle = self.bind(raw, tag, contract)?;
                Ok(Variant::from_handle(handle).unwrap_or(Variant::Nil))
            }
        }
    }

    #[track_caller]
    pub fn read_variant(&mut self) -> Variant {
        match self.try_read_variant() {
            Ok(variant) => variant,
            Err(defect) => {
                self.marshaller.report(&defect);
                Variant::Nil
            }
        }
    }

    /// Reads the return in whatever form the call declared.
    #[track_caller]
    pub fn try_read_return(&mut self) -> Result<ReturnValue, MarshalDefect> {
        match self.spec.ret() {
            ReturnSpec::Void => {
                self.expect_phase("read_return", &[Phase::Invoked])?;
                self.phase = Phase::Consumed;
                Ok(ReturnValue::Void)
            }
            ReturnSpec::Value(kind) => {
                self.expect_phase("read_return", &[Phase::Invoked])?;
                let value = RawValue::new(kind, self.storage.bytes(self.ret_word(), kind.size()));
                self.phase = Phase::Consumed;
                Ok(ReturnValue::Value(value))
            }
            ReturnSpec::Handle { .. } => self.try_read_handle().map(ReturnValue::Handle),
            ReturnSpec::Variant { .. } => self.try_read_variant().map(ReturnValue::Variant),
        }
    }

    #[track_caller]
    pub fn read_return(&mut self) -> ReturnValue {
        match self.try_read_return() {
            Ok(value) => value,
            Err(defect) => {
                self.marshaller.report(&defect);
                ReturnValue::Void
            }
        }
    }

    // ------------------------------------------------------------------
    // End
    // ------------------------------------------------------------------

    /// Ends the call: transient arguments are released and Borrowed returns
    /// bound to the frame expire. Returns the number of native releases.
    /// Ending twice is a no-op.
    pub fn end(&mut self) -> usize {
        if self.phase == Phase::Released {
            log::trace!("frame already ended");
            return 0;
        }
        if self.phase == Phase::Populated {
            log::debug!("frame for {:?} ended without invoke", self.spec.shape());
        }
        self.phase = Phase::Released;
        self.arena.as_mut().map_or(0, Arena::close)
    }

    // ------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------

    #[inline]
    fn registry(&self) -> &'m HandleRegistry {
        let marshaller: &'m Marshaller = self.marshaller;
        marshaller.registry()
    }

    #[inline]
    fn ret_word(&self) -> usize {
        self.offsets[self.spec.arg_count()] as usize
    }

    fn arena(&mut self) -> &Arena<'m> {
        let registry = self.registry();
        self.arena.get_or_insert_with(|| {
            let arena = registry.open_scope();
            log::trace!("frame opened {}", arena.scope());
            arena
        })
    }

    fn borrow_scope(&mut self) -> ScopeId {
        match self.outer {
            Some(scope) => scope,
            None => self.arena().scope(),
        }
    }

    fn expect_phase(&self, op: &'static str, allowed: &[Phase]) -> Result<(), MarshalDefect> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(MarshalDefect::PhaseViolation {
                op,
                phase: self.phase,
            })
        }
    }

    /// Word offset and declared kind of argument `index`.
    fn arg_slot(
        &self,
        op: &'static str,
        index: usize,
        found: SlotKind,
    ) -> Result<(usize, SlotKind), MarshalDefect> {
        self.expect_phase(op, &[Phase::Unopened, Phase::Populated])?;
        let expected = self.spec.shape().arg(index).ok_or(MarshalDefect::ArgumentOutOfRange {
            index,
            count: self.spec.arg_count(),
        })?;
        if self.marshaller.config().verify_kinds && expected != found {
            return Err(MarshalDefect::KindMismatch {
                index,
                expected,
                found,
            });
        }
        Ok((self.offsets[index] as usize, expected))
    }

    fn mark_written(&mut self, index: usize) {
        self.written |= 1 << index;
        let all = (1u32 << self.spec.arg_count()) - 1;
        if u32::from(self.written) == all {
            self.phase = Phase::Populated;
        }
    }

    /// Objects are passed as the object pointer itself; other receivers
    /// (builtin values such as strings) as a pointer to their words.
    fn receiver_ptr(&mut self) -> Result<*mut c_void, MarshalDefect> {
        let Some(receiver) = self.receiver else {
            return Ok(ptr::null_mut());
        };
        let raw = self.registry().try_borrow(&receiver)?;
        self.receiver_words = [0; MAX_HANDLE_WORDS];
        self.receiver_words[..raw.len()].copy_from_slice(raw.as_slice());
        Ok(match receiver.tag() {
            TypeTag::Object => raw.first() as *mut c_void,
            _ => self.receiver_words.as_mut_ptr().cast(),
        })
    }

    #[track_caller]
    fn bind(
        &mut self,
        raw: RawWords,
        tag: TypeTag,
        contract: OwnershipKind,
    ) -> Result<Handle, MarshalDefect> {
        let ownership = match contract {
            OwnershipKind::Owned => Ownership::Owned,
            OwnershipKind::SharedRefCounted => Ownership::SharedRefCounted,
            OwnershipKind::Borrowed => Ownership::Borrowed(self.borrow_scope()),
            OwnershipKind::LifetimeBound => match self.receiver {
                Some(receiver) => Ownership::LifetimeBound(receiver.id()),
                None => return Err(MarshalDefect::MissingReceiver { tag }),
            },
        };
        Ok(self.registry().try_acquire(raw, tag, ownership)?)
    }
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        self.end();
    }
}

impl fmt::Debug for Frame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("spec", &self.spec)
            .field("phase", &self.phase)
            .field("receiver", &self.receiver)
            .field("written", &format_args!("{:#b}", self.written))
            .field("call_error", &self.call_error)
            .field("inline", &self.storage.is_inline())
            .finish_non_exhaustive()
    }
}

fn handle_kind(tag: TypeTag) -> SlotKind {
    tag.handle_width()
        .and_then(SlotKind::for_handle_width)
        .unwrap_or(SlotKind::Word1)
}
