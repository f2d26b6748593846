use bitfield::bitfield;

/// Card Identification block.
pub type CidData = [u8; 16];

bitfield! {
    /// Card Identification register.
    pub struct Cid(u128);
    impl Debug;
    pub u8, manufacturer_id, _: 127, 120;
    pub u16, oem_id, _: 119, 104;
    pub u64, product_name_raw, _: 103, 64;
    pub u8, product_revision, _: 63, 56;
    pub u32, serial_number, _: 55, 24;
    pub u8, manufacturing_year_offset, _: 19, 12;
    pub u8, manufacturing_month, _: 11, 8;
    pub u8, crc, _: 7, 1;
}

impl From<CidData> for Cid {
    fn from(cid_data: CidData) -> Self {
        Cid(u128::from_be_bytes(cid_data))
    }
}

impl Cid {
    /// Product name, five ASCII characters.
    pub fn product_name(&self) -> [u8; 5] {
        let bytes = self.product_name_raw().to_be_bytes();
        [bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]]
    }

    /// Manufacturing year.
    pub fn manufacturing_year(&self) -> u16 {
        2000 + u16::from(self.manufacturing_year_offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn decodes_fields() {
        let cid = Cid::from(hex!("035344534430384780A1B2C3D4011B5F"));
        assert_eq!(cid.manufacturer_id(), 0x03);
        assert_eq!(cid.oem_id(), u16::from_be_bytes(*b"SD"));
        assert_eq!(&cid.product_name(), b"SD08G");
        assert_eq!(cid.product_revision(), 0x80);
        assert_eq!(cid.serial_number(), 0xA1B2_C3D4);
        assert_eq!(cid.manufacturing_year(), 2017);
        assert_eq!(cid.manufacturing_month(), 11);
    }
}
