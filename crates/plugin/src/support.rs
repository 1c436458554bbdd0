use tracing::info;

pub const SUPPORT_PACKET_FILENAME: &str = "demo_plugin_support_packet.txt";

/// A file contributed to the host's support packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupportFile {
    pub filename: String,
    pub body: Vec<u8>,
}

pub fn support_packet() -> Vec<SupportFile> {
    info!(event_name = "plugin.support.generate", "Generating demo support data");
    vec![SupportFile {
        filename: SUPPORT_PACKET_FILENAME.to_owned(),
        body: b"this is a demo file.".to_vec(),
    }]
}
