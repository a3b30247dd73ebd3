/// Opaque text-at-rest encryption for free-text fields (exchange messages,
/// chat bodies, feedback comments, attachment filenames).
///
/// Values are tagged with an `enc:v1:` prefix so historical plaintext rows
/// decrypt correctly without a migration: untagged values pass through
/// verbatim, tagged values are AES-256-GCM with the packed layout
/// `iv(12) | tag(16) | ciphertext`, base64-encoded.
pub mod keys;
pub mod secure;

pub use secure::TextCipher;
