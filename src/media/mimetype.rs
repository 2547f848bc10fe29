use infer::MatcherType;

/// Leading bytes kept for sniffing; covers every signature infer checks.
pub const SNIFF_LEN: usize = 8192;

/// Container type of an upload, judged from its magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Video(&'static str),
    Other(&'static str),
    Unknown,
}

impl UploadKind {
    pub fn sniff(head: &[u8]) -> Self {
        match infer::get(head) {
            Some(kind) if kind.matcher_type() == MatcherType::Video => UploadKind::Video(kind.mime_type()),
            Some(kind) => UploadKind::Other(kind.mime_type()),
            None => UploadKind::Unknown,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            UploadKind::Video(mime) | UploadKind::Other(mime) => mime,
            UploadKind::Unknown => "application/octet-stream",
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, UploadKind::Video(_))
    }
}

/// Keeps the start of a streamed upload so it can be sniffed without
/// reading the file back.
#[derive(Debug, Default)]
pub struct UploadHead {
    bytes: Vec<u8>,
    total: u64,
}

impl UploadHead {
    pub fn push(&mut self, chunk: &[u8]) {
        let room = SNIFF_LEN.saturating_sub(self.bytes.len()).min(chunk.len());
        self.bytes.extend_from_slice(&chunk[..room]);
        self.total += chunk.len() as u64;
    }

    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    pub fn kind(&self) -> UploadKind {
        UploadKind::sniff(&self.bytes)
    }
}
