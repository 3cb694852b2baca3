use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::wg::{Secret, config::WgConfig};

pub const DEFAULT_KEYFILE_DIR: &str = "/etc/systemd/network";

const PRIVATE_KEY_SUFFIX: &str = "privkey";
const SYMMETRIC_KEY_SUFFIX: &str = "symkey";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyPurpose {
    Private,

    // index of the peer in source order
    Preshared(usize),
}

/// Where keyfiles live. Paths depend only on the interface name and the key
/// purpose, never on the key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyfileLayout {
    pub dir: PathBuf,
    pub private_keyfile: Option<PathBuf>,
}

impl Default for KeyfileLayout {
    fn default() -> Self {
        Self::new(DEFAULT_KEYFILE_DIR)
    }
}

impl KeyfileLayout {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            private_keyfile: None,
        }
    }

    pub fn with_private_keyfile(mut self, path: impl AsRef<Path>) -> Self {
        self.private_keyfile = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn path(&self, interface_name: &str, purpose: KeyPurpose) -> PathBuf {
        match purpose {
            KeyPurpose::Private => self.private_keyfile.clone().unwrap_or_else(|| {
                self.dir
                    .join(format!("{interface_name}.{PRIVATE_KEY_SUFFIX}"))
            }),
            KeyPurpose::Preshared(idx) => self.dir.join(format!(
                "{interface_name}.peer{}.{SYMMETRIC_KEY_SUFFIX}",
                idx + 1
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyfile {
    pub path: PathBuf,
    secret: Secret,
}

impl Keyfile {
    /// File body: the base64 key and a trailing newline.
    pub fn contents(&self) -> String {
        format!("{}\n", self.secret.expose())
    }
}

pub fn render_keyfiles(cfg: &WgConfig, layout: &KeyfileLayout) -> BTreeMap<KeyPurpose, Keyfile> {
    let name = &cfg.interface.name;
    let mut keyfiles = BTreeMap::new();

    keyfiles.insert(
        KeyPurpose::Private,
        Keyfile {
            path: layout.path(name, KeyPurpose::Private),
            secret: cfg.interface.private_key.clone(),
        },
    );

    for (idx, peer) in cfg.peers.iter().enumerate() {
        if let Some(psk) = &peer.preshared_key {
            let purpose = KeyPurpose::Preshared(idx);
            keyfiles.insert(
                purpose,
                Keyfile {
                    path: layout.path(name, purpose),
                    secret: psk.clone(),
                },
            );
        }
    }

    keyfiles
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "[Interface]
PrivateKey = cJgeEfHUay0aKpV+k1lFK9nq9JJcqzKm8+Wh3EGtg1c=
Address = 10.0.0.1/24

[Peer]
PublicKey = kB9CSPsPS5irR0ZpVAHZKPNHLQKjIFjmgc6MSCAiWUs=
AllowedIPs = 10.0.0.2/32

[Peer]
PublicKey = sMYYPASxJslAuszh5PgUPysrzZHHBOzawJ8PFbRQrHI=
PresharedKey = KIst3pK+YVHmM5k7NbNULKd2px9vaRsFi/y4E7NDWDQ=
AllowedIPs = 10.0.0.3/32
";

    #[test]
    fn test_render_keyfiles() {
        let cfg = WgConfig::parse_config("wg0", CONFIG).unwrap();
        let keyfiles = render_keyfiles(&cfg, &KeyfileLayout::default());

        let purposes: Vec<KeyPurpose> = keyfiles.keys().copied().collect();
        assert_eq!(purposes, vec![KeyPurpose::Private, KeyPurpose::Preshared(1)]);

        let private = &keyfiles[&KeyPurpose::Private];
        assert_eq!(private.path, PathBuf::from("/etc/systemd/network/wg0.privkey"));
        assert_eq!(
            private.contents(),
            "cJgeEfHUay0aKpV+k1lFK9nq9JJcqzKm8+Wh3EGtg1c=\n"
        );

        let psk = &keyfiles[&KeyPurpose::Preshared(1)];
        assert_eq!(psk.path, PathBuf::from("/etc/systemd/network/wg0.peer2.symkey"));
        assert_eq!(psk.contents(), "KIst3pK+YVHmM5k7NbNULKd2px9vaRsFi/y4E7NDWDQ=\n");
    }

    #[test]
    fn test_paths_ignore_key_material() {
        let cfg = WgConfig::parse_config("wg0", CONFIG).unwrap();
        let other = WgConfig::parse_config(
            "wg0",
            &CONFIG.replace(
                "cJgeEfHUay0aKpV+k1lFK9nq9JJcqzKm8+Wh3EGtg1c=",
                "ED3TF8deMhmXHa7Jrp024uv5T7jKl7611vFV3C1P+EY=",
            ),
        )
        .unwrap();

        let layout = KeyfileLayout::new("/run/keys");
        let paths = |cfg: &WgConfig| -> Vec<PathBuf> {
            render_keyfiles(cfg, &layout)
                .into_values()
                .map(|keyfile| keyfile.path)
                .collect()
        };

        assert_eq!(paths(&cfg), paths(&other));
    }

    #[test]
    fn test_private_keyfile_override() {
        let layout = KeyfileLayout::new("/run/keys").with_private_keyfile("/root/wg0.key");

        assert_eq!(
            layout.path("wg0", KeyPurpose::Private),
            PathBuf::from("/root/wg0.key")
        );
        assert_eq!(
            layout.path("wg0", KeyPurpose::Preshared(0)),
            PathBuf::from("/run/keys/wg0.peer1.symkey")
        );
    }

    #[test]
    fn test_debug_hides_secret() {
        let cfg = WgConfig::parse_config("wg0", CONFIG).unwrap();
        let keyfiles = render_keyfiles(&cfg, &KeyfileLayout::default());

        let dbg = format!("{keyfiles:?}");
        assert!(!dbg.contains("cJgeEfHUay0aKpV"));
        assert!(!dbg.contains("KIst3pK"));
    }
}
