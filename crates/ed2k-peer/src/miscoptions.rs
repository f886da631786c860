//! Misc-options bitfields exchanged during handshake (spec §4.5 "Misc-options").
//!
//! Grounded on `original_source/src/packet_struct.cpp`'s `misc_options`
//! (nibble-packed fields) and `misc_options2` (single-bit flags) load/generate
//! pairs; bit widths and offsets match the real client bit-for-bit.

/// Option-set 1: nibble-packed capability versions (spec §4.5 "option-set 1").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MiscOptions1 {
    /// AICH partial-hash support version.
    pub aich_version: u8,
    /// Unicode filenames supported.
    pub unicode_support: bool,
    /// UDP protocol version.
    pub udp_version: u8,
    /// `compressed_part` protocol version (`DataCompVer`).
    pub data_comp_version: u8,
    /// Secure identification support version.
    pub support_sec_ident: u8,
    /// Source-exchange protocol version.
    pub source_exchange_version: u8,
    /// Extended-requests protocol version.
    pub extended_requests_version: u8,
    /// Accept-comment protocol version.
    pub accept_comment_version: u8,
    /// Don't advertise shared files to this peer.
    pub no_view_shared_files: bool,
    /// Multipacket support.
    pub multipacket: bool,
    /// Preview support.
    pub supports_preview: bool,
}

impl MiscOptions1 {
    /// Unpack from the 32-bit wire value.
    #[must_use]
    pub fn load(opts: u32) -> Self {
        Self {
            aich_version: ((opts >> (4 * 7 + 1)) & 0x07) as u8,
            unicode_support: (opts >> (4 * 7)) & 0x01 != 0,
            udp_version: ((opts >> (4 * 6)) & 0x0f) as u8,
            data_comp_version: ((opts >> (4 * 5)) & 0x0f) as u8,
            support_sec_ident: ((opts >> (4 * 4)) & 0x0f) as u8,
            source_exchange_version: ((opts >> (4 * 3)) & 0x0f) as u8,
            extended_requests_version: ((opts >> (4 * 2)) & 0x0f) as u8,
            accept_comment_version: ((opts >> (4 * 1)) & 0x0f) as u8,
            no_view_shared_files: (opts >> (1 * 2)) & 0x01 != 0,
            multipacket: (opts >> (1 * 1)) & 0x01 != 0,
            supports_preview: (opts >> (1 * 0)) & 0x01 != 0,
        }
    }

    /// Pack into the 32-bit wire value.
    #[must_use]
    pub fn generate(&self) -> u32 {
        (u32::from(self.aich_version) << (4 * 7 + 1))
            | (u32::from(self.unicode_support) << (4 * 7))
            | (u32::from(self.udp_version) << (4 * 6))
            | (u32::from(self.data_comp_version) << (4 * 5))
            | (u32::from(self.support_sec_ident) << (4 * 4))
            | (u32::from(self.source_exchange_version) << (4 * 3))
            | (u32::from(self.extended_requests_version) << (4 * 2))
            | (u32::from(self.accept_comment_version) << (4 * 1))
            | (u32::from(self.no_view_shared_files) << (1 * 2))
            | (u32::from(self.multipacket) << (1 * 1))
            | (u32::from(self.supports_preview) << (1 * 0))
    }
}

const LARGE_FILE_OFFSET: u32 = 4;
const MULTIP_OFFSET: u32 = 5;
const SRC_EXT_OFFSET: u32 = 10;
const CAPTCHA_OFFSET: u32 = 11;

/// Option-set 2: single-bit flags (spec §4.5 "option-set 2").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MiscOptions2(u32);

impl MiscOptions2 {
    /// Unpack from the 32-bit wire value (stored verbatim; bits are read lazily).
    #[must_use]
    pub fn load(opts: u32) -> Self {
        Self(opts)
    }

    /// `true` if the remote advertises 64-bit file offsets.
    #[must_use]
    pub fn supports_large_files(&self) -> bool {
        (self.0 >> LARGE_FILE_OFFSET) & 0x01 != 0
    }

    /// `true` if the remote advertises the multipacket extension.
    #[must_use]
    pub fn supports_multipacket_ext(&self) -> bool {
        (self.0 >> MULTIP_OFFSET) & 0x01 != 0
    }

    /// `true` if the remote advertises source-exchange v2.
    #[must_use]
    pub fn supports_source_exchange2(&self) -> bool {
        (self.0 >> SRC_EXT_OFFSET) & 0x01 != 0
    }

    /// `true` if the remote advertises captcha support.
    #[must_use]
    pub fn supports_captcha(&self) -> bool {
        (self.0 >> CAPTCHA_OFFSET) & 0x01 != 0
    }

    /// Set the large-files bit.
    pub fn set_large_files(&mut self) {
        self.0 |= 1 << LARGE_FILE_OFFSET;
    }

    /// Set the multipacket-extension bit.
    pub fn set_multipacket_ext(&mut self) {
        self.0 |= 1 << MULTIP_OFFSET;
    }

    /// Set the source-exchange-v2 bit.
    pub fn set_source_exchange2(&mut self) {
        self.0 |= 1 << SRC_EXT_OFFSET;
    }

    /// Set the captcha-support bit.
    pub fn set_captcha(&mut self) {
        self.0 |= 1 << CAPTCHA_OFFSET;
    }

    /// Pack into the 32-bit wire value.
    #[must_use]
    pub fn generate(&self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misc_options1_roundtrips() {
        let opts = MiscOptions1 {
            aich_version: 1,
            unicode_support: true,
            udp_version: 3,
            data_comp_version: 1,
            support_sec_ident: 2,
            source_exchange_version: 3,
            extended_requests_version: 1,
            accept_comment_version: 1,
            no_view_shared_files: true,
            multipacket: false,
            supports_preview: true,
        };
        let packed = opts.generate();
        assert_eq!(MiscOptions1::load(packed), opts);
    }

    #[test]
    fn misc_options2_bits_are_independent() {
        let mut o = MiscOptions2::default();
        o.set_large_files();
        assert!(o.supports_large_files());
        assert!(!o.supports_multipacket_ext());
        o.set_captcha();
        assert!(o.supports_captcha());
        assert!(o.supports_large_files());
    }

    #[test]
    fn misc_options2_load_matches_bit_offsets() {
        let o = MiscOptions2::load(1 << SRC_EXT_OFFSET);
        assert!(o.supports_source_exchange2());
        assert!(!o.supports_large_files());
    }
}
