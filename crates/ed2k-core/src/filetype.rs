//! eD2K file-type classification and media tag names.
//!
//! Supplemented from `original_source/include/libed2k/file.hpp`'s
//! `EED2KFileType`/`ED2KFTSTR_*` table (spec §6's `offer_files` carries
//! "tags (name, size, type, media metadata)" but spec.md does not itself
//! enumerate the type strings).

/// The coarse file-type categories the server and clients classify shared
/// files into, carried as the string value of an [`crate::tag::names::FT_FILETYPE`] tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Any type / unset
    Any,
    /// Audio
    Audio,
    /// Video
    Video,
    /// Image
    Image,
    /// Program/executable
    Program,
    /// Document
    Document,
    /// Archive
    Archive,
    /// CD/DVD image
    CdImage,
    /// Emulecollection
    EmuleCollection,
}

impl FileType {
    /// The wire string for this type (`ED2KFTSTR_*` in the reference client).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "",
            Self::Audio => "Audio",
            Self::Video => "Video",
            Self::Image => "Image",
            Self::Program => "Pro",
            Self::Document => "Doc",
            Self::Archive => "Arc",
            Self::CdImage => "CDImage",
            Self::EmuleCollection => "EmuleCollection",
        }
    }

    /// Classify by file extension (lowercased, without the leading dot).
    #[must_use]
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" | "flac" | "wav" | "ogg" | "m4a" | "wma" => Self::Audio,
            "avi" | "mkv" | "mp4" | "mpg" | "mpeg" | "wmv" | "mov" => Self::Video,
            "jpg" | "jpeg" | "png" | "gif" | "bmp" => Self::Image,
            "exe" | "msi" => Self::Program,
            "pdf" | "doc" | "docx" | "txt" => Self::Document,
            "zip" | "rar" | "7z" | "gz" | "tar" => Self::Archive,
            "iso" | "nrg" | "bin" => Self::CdImage,
            "emulecollection" => Self::EmuleCollection,
            _ => Self::Any,
        }
    }
}

/// Media tag string names, carried as `FT_MEDIA_*` tags on `offer_files` entries.
pub mod media {
    /// `Artist` media tag name
    pub const ARTIST: &str = "Artist";
    /// `Album` media tag name
    pub const ALBUM: &str = "Album";
    /// `Title` media tag name
    pub const TITLE: &str = "Title";
    /// `length` media tag name (track/video duration)
    pub const LENGTH: &str = "length";
    /// `bitrate` media tag name
    pub const BITRATE: &str = "bitrate";
    /// `codec` media tag name
    pub const CODEC: &str = "codec";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_extensions() {
        assert_eq!(FileType::from_extension("MP3"), FileType::Audio);
        assert_eq!(FileType::from_extension("mkv"), FileType::Video);
        assert_eq!(FileType::from_extension("unknownext"), FileType::Any);
    }
}
