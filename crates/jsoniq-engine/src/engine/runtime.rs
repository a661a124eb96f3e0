use crate::engine::substrate::{InlineSubstrate, Substrate};
use crate::item::Name;
use core::fmt;
use std::sync::Arc;

/// Broad classification of an [`Error`], used by callers that need to react to a
/// family of failures (e.g. the castable check downgrading cast failures).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Structurally invalid query, detected while compiling.
    Semantic,
    /// A cast outside the castability relation.
    CastFailure,
    /// A structured item used where an atomic item is required.
    NonAtomicKey,
    /// Illegal comparison or cardinality violation.
    TypeMismatch,
    /// Iterator protocol violation. Always an engine bug.
    IteratorFlow,
    /// Lookup of a variable no scope defines.
    UnboundVariable,
    /// Other dynamic errors raised while data is pulled.
    Dynamic,
}

/// Error codes emitted by the engine.
///
/// W3C/JSONiq codes where one exists; `ENGN*` codes are project specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    FOAR0001, // division by zero
    FOCA0002, // value out of range for the target type
    FORG0001, // invalid lexical form / not castable
    FORG0006, // invalid argument for effective boolean value
    JNDY0003, // duplicate object key
    JNTY0004, // atomization of an object or array
    XPST0003, // invalid clause chain
    XPST0008, // undeclared variable
    XPST0080, // invalid cast target
    XPTY0004, // incomparable types / cardinality
    ENGN0001, // iterator protocol violation
    ENGN0002, // substrate failure
    ENGN0003, // typed accessor on a mismatched variant
    ENGN0004, // malformed encoded item
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            FOAR0001 => "err:FOAR0001",
            FOCA0002 => "err:FOCA0002",
            FORG0001 => "err:FORG0001",
            FORG0006 => "err:FORG0006",
            JNDY0003 => "jerr:JNDY0003",
            JNTY0004 => "jerr:JNTY0004",
            XPST0003 => "err:XPST0003",
            XPST0008 => "err:XPST0008",
            XPST0080 => "err:XPST0080",
            XPTY0004 => "err:XPTY0004",
            ENGN0001 => "err:ENGN0001",
            ENGN0002 => "err:ENGN0002",
            ENGN0003 => "err:ENGN0003",
            ENGN0004 => "err:ENGN0004",
            Unknown => "err:UNKNOWN",
        }
    }

    pub fn from_code(s: &str) -> Self {
        use ErrorCode::*;
        match s {
            "err:FOAR0001" => FOAR0001,
            "err:FOCA0002" => FOCA0002,
            "err:FORG0001" => FORG0001,
            "err:FORG0006" => FORG0006,
            "jerr:JNDY0003" => JNDY0003,
            "jerr:JNTY0004" => JNTY0004,
            "err:XPST0003" => XPST0003,
            "err:XPST0008" => XPST0008,
            "err:XPST0080" => XPST0080,
            "err:XPTY0004" => XPTY0004,
            "err:ENGN0001" => ENGN0001,
            "err:ENGN0002" => ENGN0002,
            "err:ENGN0003" => ENGN0003,
            "err:ENGN0004" => ENGN0004,
            _ => Unknown,
        }
    }

    /// The family a code belongs to. XPST0008 is static when raised by the
    /// compiler; at evaluation time the same condition is an unbound lookup.
    pub fn kind(&self) -> ErrorKind {
        use ErrorCode::*;
        match self {
            XPST0003 => ErrorKind::Semantic,
            FORG0001 | FOCA0002 | XPST0080 => ErrorKind::CastFailure,
            JNTY0004 => ErrorKind::NonAtomicKey,
            XPTY0004 | FORG0006 => ErrorKind::TypeMismatch,
            ENGN0001 => ErrorKind::IteratorFlow,
            XPST0008 => ErrorKind::UnboundVariable,
            FOAR0001 | JNDY0003 | ENGN0002 | ENGN0003 | ENGN0004 | Unknown => ErrorKind::Dynamic,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn from_code(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    pub fn semantic(msg: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::XPST0003, msg)
    }

    pub fn cast(msg: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::FORG0001, msg)
    }

    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::XPTY0004, msg)
    }

    pub fn iterator_flow(what: &str) -> Self {
        Self::from_code(
            ErrorCode::ENGN0001,
            format!("{what}: invalid next() call; iterator is closed or exhausted"),
        )
    }

    /// Compose an error with a source cause.
    pub fn with_source(
        mut self,
        source: impl Into<Option<Arc<dyn std::error::Error + Send + Sync>>>,
    ) -> Self {
        self.source = source.into();
        self
    }
}

impl From<rust_decimal::Error> for Error {
    fn from(e: rust_decimal::Error) -> Self {
        Error::from_code(ErrorCode::FOCA0002, "decimal overflow")
            .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {} ({})", self.message, self.code.as_str())
    }
}

/// Placement of empty (and null) order-by keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyOrder {
    #[default]
    Greatest,
    Least,
}

/// Compile-time settings captured into a compiled query.
#[derive(Clone)]
pub struct EngineConfig {
    /// When false every stage runs locally, whatever its source.
    pub delegation: bool,
    pub substrate: Arc<dyn Substrate>,
    /// Partition count used by `parallelize` sources that do not name one.
    pub default_partitions: usize,
    /// Empty-key placement for order-by specs that do not state one.
    pub empty_order: EmptyOrder,
    /// Names the caller promises to bind in the dynamic context; the static
    /// scope check accepts references to them.
    pub external_variables: Vec<Name>,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("delegation", &self.delegation)
            .field("substrate", &self.substrate.name())
            .field("default_partitions", &self.default_partitions)
            .field("empty_order", &self.empty_order)
            .field("external_variables", &self.external_variables)
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delegation: true,
            substrate: Arc::new(InlineSubstrate),
            default_partitions: 4,
            empty_order: EmptyOrder::Greatest,
            external_variables: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Copy of this configuration used inside delegated work units: nested
    /// `parallelize` sources run locally there.
    pub(crate) fn local_only(&self) -> Self {
        Self {
            delegation: false,
            ..self.clone()
        }
    }
}

/// Builder for [`EngineConfig`].
///
/// The configuration is an immutable snapshot embedded into a compiled query;
/// execution modes are resolved against it once, at compile time.
pub struct EngineConfigBuilder {
    cfg: EngineConfig,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            cfg: EngineConfig::default(),
        }
    }

    pub fn with_delegation(mut self, enabled: bool) -> Self {
        self.cfg.delegation = enabled;
        self
    }

    pub fn with_substrate(mut self, substrate: Arc<dyn Substrate>) -> Self {
        self.cfg.substrate = substrate;
        self
    }

    /// Zero is clamped to one partition.
    pub fn with_default_partitions(mut self, partitions: usize) -> Self {
        self.cfg.default_partitions = partitions.max(1);
        self
    }

    pub fn with_empty_order(mut self, order: EmptyOrder) -> Self {
        self.cfg.empty_order = order;
        self
    }

    /// Declare an external variable.
    pub fn with_external_variable(mut self, name: impl Into<Name>) -> Self {
        self.cfg.external_variables.push(name.into());
        self
    }

    pub fn build(self) -> EngineConfig {
        self.cfg
    }
}
