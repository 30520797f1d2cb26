use std::error;
use std::fmt;
use std::io;

/// A decode/encode failure or semantic violation found in a message on the wire.
///
/// Covers both `WireFormatError` and `ProtocolViolation` from the design: both
/// recover the same way (reject the message, tear the session/packet down).
#[derive(Debug)]
pub enum WireError {
    /// Marker bytes were not all-ones.
    BadMarker,
    /// Declared length was outside the legal range for the message type.
    BadLength { declared: usize, min: usize, max: usize },
    /// A field held a value that is syntactically valid but semantically illegal.
    BadValue(String),
    /// Not enough bytes were available yet to decode a complete message.
    Incomplete,
    /// An LSA's Fletcher-16 checksum did not match its contents.
    LsaChecksumInvalid,
    /// An OSPF packet's IP-style checksum did not match its contents.
    PacketChecksumInvalid,
    /// Underlying I/O failure while framing.
    Io(String),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use WireError::*;
        match self {
            BadMarker => write!(f, "marker field was not all-ones"),
            BadLength { declared, min, max } => write!(
                f,
                "bad length: declared={} allowed=[{}, {}]",
                declared, min, max
            ),
            BadValue(msg) => write!(f, "bad value: {}", msg),
            Incomplete => write!(f, "incomplete message"),
            LsaChecksumInvalid => write!(f, "LSA checksum invalid"),
            PacketChecksumInvalid => write!(f, "OSPF packet checksum invalid"),
            Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl error::Error for WireError {}

impl From<io::Error> for WireError {
    fn from(e: io::Error) -> Self {
        WireError::Io(e.to_string())
    }
}

/// Maps a `WireError` to the BGP NOTIFICATION (error code, subcode) that should
/// be sent to the peer before tearing the session down. RFC 4271 §4.5.
impl WireError {
    pub fn notification_code(&self) -> (u8, u8) {
        match self {
            WireError::BadMarker => (1, 1),       // Message Header Error / Connection Not Synchronized
            WireError::BadLength { .. } => (1, 2), // Message Header Error / Bad Message Length
            WireError::BadValue(_) => (3, 0),      // Update Message Error / unspecific
            WireError::Incomplete => (1, 2),
            WireError::LsaChecksumInvalid | WireError::PacketChecksumInvalid => (1, 0),
            WireError::Io(_) => (6, 0),            // Cease
        }
    }
}

/// Errors arising from a BGP or OSPF session's runtime: FSM violations, timer
/// expiry that demands teardown, and transport failures.
#[derive(Debug)]
pub enum SessionError {
    /// Peer was de-configured while a session was active.
    Deconfigured,
    /// Received an unexpected ASN in OPEN. (received, expected)
    OpenAsnMismatch(u32, u32),
    /// An event arrived in a state that forbids it. (minor error subcode)
    FiniteStateMachine(u8),
    /// Hold time expired without a keepalive or update. (interval, seconds)
    HoldTimeExpired(u16),
    /// A decode/encode failure propagated up from the wire codec.
    Wire(WireError),
    /// Something happened in the transport layer.
    Transport(String),
    /// Some other condition that forces session teardown.
    Other(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use SessionError::*;
        match self {
            Deconfigured => write!(f, "peer de-configured"),
            OpenAsnMismatch(received, expected) => {
                write!(f, "OPEN ASN mismatch (received={}, expected={})", received, expected)
            }
            FiniteStateMachine(minor) => write!(f, "finite state machine error [{}]", minor),
            HoldTimeExpired(secs) => write!(f, "hold time expired after {} seconds", secs),
            Wire(e) => write!(f, "wire error: {}", e),
            Transport(reason) => write!(f, "transport error: {}", reason),
            Other(reason) => write!(f, "{}", reason),
        }
    }
}

impl error::Error for SessionError {}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        SessionError::Transport(e.to_string())
    }
}

impl From<WireError> for SessionError {
    fn from(e: WireError) -> Self {
        SessionError::Wire(e)
    }
}

/// `FibInstaller` failure. Logged; never aborts the owning engine.
#[derive(Debug)]
pub struct FibError(pub String);

impl fmt::Display for FibError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FIB error: {}", self.0)
    }
}

impl error::Error for FibError {}

/// Configuration load/validate failure. Surfaced before any socket is opened.
#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ConfigError::*;
        match self {
            Io(msg) => write!(f, "could not read configuration: {}", msg),
            Parse(msg) => write!(f, "could not parse configuration: {}", msg),
            Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}
