//! Module self-description.

use crate::error::{Error, Result};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;
use transcode_core::{Codec, MediaKind};

/// Capability class a module is loaded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleClass {
    /// Source reader producing raw frames.
    Import,
    /// In-place frame processor.
    Filter,
    /// Container reader.
    Demultiplex,
    /// Decoder.
    Decode,
    /// Encoder.
    Encode,
    /// Container writer.
    Multiplex,
}

impl ModuleClass {
    /// Canonical class name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Filter => "filter",
            Self::Demultiplex => "demultiplex",
            Self::Decode => "decode",
            Self::Encode => "encode",
            Self::Multiplex => "multiplex",
        }
    }

    /// Feature bit a module must declare to be loaded as this class.
    pub fn feature(&self) -> ModuleFeatures {
        match self {
            Self::Import | Self::Decode => ModuleFeatures::DECODE,
            Self::Filter => ModuleFeatures::FILTER,
            Self::Demultiplex => ModuleFeatures::DEMULTIPLEX,
            Self::Encode => ModuleFeatures::ENCODE,
            Self::Multiplex => ModuleFeatures::MULTIPLEX,
        }
    }
}

impl fmt::Display for ModuleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "import" => Ok(Self::Import),
            "filter" => Ok(Self::Filter),
            "demultiplex" | "demux" => Ok(Self::Demultiplex),
            "decode" => Ok(Self::Decode),
            "encode" => Ok(Self::Encode),
            "multiplex" | "mplex" => Ok(Self::Multiplex),
            other => Err(Error::UnknownClass(other.to_string())),
        }
    }
}

bitflags! {
    /// What a module can do and which media it handles.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ModuleFeatures: u32 {
        const FILTER = 0x0000_0001;
        const DECODE = 0x0000_0002;
        const ENCODE = 0x0000_0004;
        const DEMULTIPLEX = 0x0000_0020;
        const MULTIPLEX = 0x0000_0040;
        const VIDEO = 0x0001_0000;
        const AUDIO = 0x0002_0000;
        const EXTRA = 0x0004_0000;
    }
}

impl ModuleFeatures {
    /// Media bit for a media kind.
    pub fn media(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Video => Self::VIDEO,
            MediaKind::Audio => Self::AUDIO,
        }
    }
}

bitflags! {
    /// Behavioural flags of a module.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ModuleFlags: u32 {
        /// `configure` may be called again on a configured instance.
        const RECONFIGURABLE = 0x0001;
        /// `configure` must run before the instance is used.
        const REQUIRE_CONFIG = 0x0002;
    }
}

/// Static descriptor of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub features: ModuleFeatures,
    pub flags: ModuleFlags,
    /// Codecs accepted as input.
    pub codecs_in: Vec<Codec>,
    /// Codecs produced as output.
    pub codecs_out: Vec<Codec>,
}

impl ModuleInfo {
    /// Create a descriptor with no codecs declared.
    pub fn new(name: impl Into<String>, features: ModuleFeatures) -> Self {
        Self {
            name: name.into(),
            version: "0.1.0".into(),
            description: String::new(),
            features,
            flags: ModuleFlags::empty(),
            codecs_in: Vec::new(),
            codecs_out: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_flags(mut self, flags: ModuleFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_codecs(mut self, codecs_in: &[Codec], codecs_out: &[Codec]) -> Self {
        self.codecs_in = codecs_in.to_vec();
        self.codecs_out = codecs_out.to_vec();
        self
    }

    /// Check whether the module handles a media kind.
    pub fn handles(&self, kind: MediaKind) -> bool {
        self.features.contains(ModuleFeatures::media(kind))
    }

    /// Check the descriptor against the class the module is loaded as.
    pub fn validate(&self, class: ModuleClass) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("module descriptor without name".into()));
        }
        if !self.features.contains(class.feature()) {
            return Err(Error::MissingOperation {
                module: self.name.clone(),
                operation: class.as_str(),
            });
        }
        let media = ModuleFeatures::VIDEO | ModuleFeatures::AUDIO | ModuleFeatures::EXTRA;
        if !self.features.intersects(media) {
            return Err(Error::Config(format!(
                "module '{}' declares no media type",
                self.name
            )));
        }
        if self.codecs_in.contains(&Codec::Error) || self.codecs_out.contains(&Codec::Error) {
            return Err(Error::Config(format!(
                "module '{}' declares an invalid codec",
                self.name
            )));
        }
        Ok(())
    }

    /// Log the descriptor.
    pub fn log(&self) {
        info!(module = %self.name, version = %self.version, "{}", self.description);
        info!(module = %self.name, "can handle: {}", describe_media(self.features));
        info!(module = %self.name, "can do: {}", describe_capabilities(self.features));
        info!(module = %self.name, "accepts: {}", describe_codecs(&self.codecs_in));
        info!(module = %self.name, "produces: {}", describe_codecs(&self.codecs_out));
    }
}

/// Whether `producer` output can feed `consumer`.
///
/// A multiplexer never feeds anything. Otherwise any consumer input codec
/// that is `Any` or appears in the producer's output list is a match.
pub fn info_match(producer: &ModuleInfo, consumer: &ModuleInfo) -> bool {
    if producer.features.contains(ModuleFeatures::MULTIPLEX) {
        return false;
    }
    consumer
        .codecs_in
        .iter()
        .any(|codec| *codec == Codec::Any || producer.codecs_out.contains(codec))
}

/// Like [`info_match`], as an error for session setup.
pub fn check_pairing(producer: &ModuleInfo, consumer: &ModuleInfo) -> Result<()> {
    if info_match(producer, consumer) {
        Ok(())
    } else {
        Err(Error::Incompatible {
            producer: producer.name.clone(),
            consumer: consumer.name.clone(),
        })
    }
}

fn describe_media(features: ModuleFeatures) -> String {
    let names: Vec<&str> = [
        (ModuleFeatures::VIDEO, "video"),
        (ModuleFeatures::AUDIO, "audio"),
        (ModuleFeatures::EXTRA, "extra"),
    ]
    .iter()
    .filter(|(bit, _)| features.contains(*bit))
    .map(|(_, name)| *name)
    .collect();
    names.join(" ")
}

fn describe_capabilities(features: ModuleFeatures) -> String {
    let names: Vec<&str> = [
        (ModuleFeatures::FILTER, "filter"),
        (ModuleFeatures::DECODE, "decode"),
        (ModuleFeatures::ENCODE, "encode"),
        (ModuleFeatures::DEMULTIPLEX, "demultiplex"),
        (ModuleFeatures::MULTIPLEX, "multiplex"),
    ]
    .iter()
    .filter(|(bit, _)| features.contains(*bit))
    .map(|(_, name)| *name)
    .collect();
    names.join(" ")
}

fn describe_codecs(codecs: &[Codec]) -> String {
    if codecs.is_empty() {
        return "nothing".into();
    }
    codecs
        .iter()
        .map(Codec::name)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> ModuleInfo {
        ModuleInfo::new("x264", ModuleFeatures::ENCODE | ModuleFeatures::VIDEO)
            .with_codecs(&[Codec::Yuv420p], &[Codec::H264])
    }

    #[test]
    fn test_class_parsing() {
        assert_eq!("demux".parse::<ModuleClass>().unwrap(), ModuleClass::Demultiplex);
        assert_eq!("mplex".parse::<ModuleClass>().unwrap(), ModuleClass::Multiplex);
        assert!("codec".parse::<ModuleClass>().is_err());
        assert_eq!(ModuleClass::Encode.to_string(), "encode");
    }

    #[test]
    fn test_feature_bits() {
        assert_eq!(ModuleFeatures::MULTIPLEX.bits(), 0x40);
        assert_eq!(ModuleFeatures::AUDIO.bits(), 0x20000);
        assert_eq!(ModuleFlags::REQUIRE_CONFIG.bits(), 2);
    }

    #[test]
    fn test_info_match() {
        let muxer = ModuleInfo::new("avi", ModuleFeatures::MULTIPLEX | ModuleFeatures::VIDEO)
            .with_codecs(&[Codec::H264, Codec::Xvid], &[]);
        assert!(info_match(&encoder(), &muxer));

        let mp3_muxer = ModuleInfo::new("mp3", ModuleFeatures::MULTIPLEX | ModuleFeatures::AUDIO)
            .with_codecs(&[Codec::Mp3], &[]);
        assert!(!info_match(&encoder(), &mp3_muxer));
        assert!(check_pairing(&encoder(), &mp3_muxer).unwrap_err().is_contract_violation());

        let null = ModuleInfo::new("null", ModuleFeatures::MULTIPLEX | ModuleFeatures::VIDEO)
            .with_codecs(&[Codec::Any], &[]);
        assert!(info_match(&encoder(), &null));
        assert!(!info_match(&muxer, &null));
    }

    #[test]
    fn test_validate() {
        assert!(encoder().validate(ModuleClass::Encode).is_ok());
        assert!(matches!(
            encoder().validate(ModuleClass::Filter),
            Err(Error::MissingOperation { .. })
        ));
        let mediumless = ModuleInfo::new("nothing", ModuleFeatures::FILTER);
        assert!(mediumless.validate(ModuleClass::Filter).is_err());
    }

    #[test]
    fn test_descriptions() {
        let info = encoder();
        assert_eq!(describe_media(info.features), "video");
        assert_eq!(describe_capabilities(info.features), "encode");
        assert_eq!(describe_codecs(&info.codecs_out), "h264");
        assert_eq!(describe_codecs(&[]), "nothing");
    }
}
