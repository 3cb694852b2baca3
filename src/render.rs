use keyfile::KeyfileLayout;

pub mod keyfile;
pub mod netdev;
pub mod network;
pub mod nft;

pub const AUTOGENERATED: &str = "# Autogenerated by wg2nd";

/// How the netdev unit refers to private and preshared keys.
#[derive(Debug, Clone, Copy)]
pub enum KeyMode<'a> {
    // PrivateKey = / PresharedKey =
    Inline,

    // PrivateKeyFile = / PresharedKeyFile =
    Keyfile(&'a KeyfileLayout),
}
