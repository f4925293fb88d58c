use binrw::prelude::*;

#[binrw]
#[brw(little)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RSASignature {
    pub signature: [[u8; 0x20]; 8],
}

impl RSASignature {
    pub fn as_bytes(&self) -> [u8; 0x100] {
        let mut out = [0u8; 0x100];
        for (i, chunk) in self.signature.iter().enumerate() {
            out[i * 0x20..(i + 1) * 0x20].copy_from_slice(chunk);
        }
        out
    }
}

#[binrw]
#[brw(little, repr = u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The source of the content the NCA is for.
///
/// Naming follows the original service (`System`, not `Download`): the
/// non-GameCard value is what the installer rewrites a GameCard NCA to
/// when it is repackaged for installation to storage.
pub enum DistributionType {
    /// Content installed through the title-storage pipeline (not a game card).
    System = 0x00,
    /// Content is from a game card (cartridge).
    GameCard = 0x01,
}

#[binrw]
#[brw(little, repr = u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Program = 0x00,
    Meta = 0x01,
    Control = 0x02,
    Manual = 0x03,
    Data = 0x04,
    PublicData = 0x05,
}

#[binrw]
#[brw(little, repr = u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGenerationOld {
    Gen1_0_0 = 0x00,
    Unused = 0x01,
    Gen3_0_0 = 0x02,
}

#[binrw]
#[brw(little, repr = u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAreaEncryptionKeyIndex {
    Application = 0x00,
    Ocean = 0x01,
    System = 0x02,
}

#[binrw]
#[brw(little, repr = u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsType {
    RomFs = 0x00,
    PartitionFs = 0x01,
}

#[binrw]
#[brw(little, repr = u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashType {
    #[default]
    Auto = 0x00,
    None = 0x01,
    HierarchicalSha256Hash = 0x02,
    HierarchicalIntegrityHash = 0x03,
    AutoSha3 = 0x04,
    HierarchicalSha3256Hash = 0x05,
    HierarchicalIntegritySha3Hash = 0x06,
}

#[binrw]
#[brw(little, repr = u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionType {
    Auto = 0x00,
    None = 0x01,
    AesXts = 0x02,
    AesCtr = 0x03,
    AesCtrEx = 0x04,
    AesCtrSkipLayerHash = 0x05,
    AesCtrExSkipLayerHash = 0x06,
}

#[binrw]
#[brw(little, repr = u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaDataHashType {
    None = 0x00,
    HierarchicalIntegrity = 0x01,
}

#[binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
#[br(import(hash_type: HashType))]
pub enum HashData {
    HierarchicalSha256Hash {
        #[brw(pad_size_to = 0x20)]
        master_hash: [u8; 0x20],
        hash_block_size: u32,
        layer_count: u32,
        hash_table_offset: u64,
        hash_table_size: u64,
        pfs0_offset: u64,
        pfs0_size: u64,
        #[br(count = 0x68)]
        #[brw(pad_size_to = 0x68)]
        _reserved: Vec<u8>,
    },
    #[br(pre_assert(hash_type == HashType::HierarchicalIntegrityHash))]
    HierarchicalIntegrity {
        #[br(magic = b"IVFC")]
        version: u32,
        master_hash_size: u32,
        #[brw(pad_size_to = 0xB4)]
        info_level_hash: InfoLevelHash,
        #[brw(pad_size_to = 0x20)]
        master_hash: [u8; 0x20],
        #[br(count = 0x18)]
        #[brw(pad_size_to = 0x18)]
        _reserved: Vec<u8>,
    },
}

impl HashData {
    pub fn get_layer_count(&self) -> u32 {
        match self {
            HashData::HierarchicalSha256Hash { layer_count, .. } => *layer_count,
            HashData::HierarchicalIntegrity {
                info_level_hash, ..
            } => info_level_hash.max_layers,
        }
    }

    pub fn get_block_size(&self, layer_index: usize) -> Option<u32> {
        match self {
            HashData::HierarchicalSha256Hash {
                hash_block_size, ..
            } => Some(*hash_block_size),
            HashData::HierarchicalIntegrity {
                info_level_hash, ..
            } => info_level_hash
                .levels
                .get(layer_index)
                .map(|l| 1 << l.block_size_log2),
        }
    }

    /// Offset and size of the data region this hash data protects, in
    /// filesystem-section-relative bytes.
    pub fn data_region(&self) -> (u64, u64) {
        match self {
            HashData::HierarchicalSha256Hash {
                pfs0_offset,
                pfs0_size,
                ..
            } => (*pfs0_offset, *pfs0_size),
            HashData::HierarchicalIntegrity {
                info_level_hash, ..
            } => info_level_hash
                .levels
                .last()
                .map(|l| (l.offset, l.size))
                .unwrap_or((0, 0)),
        }
    }
}

#[binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct InfoLevelHash {
    pub max_layers: u32,
    #[brw(pad_size_to = 0x90)]
    #[br(count = max_layers)]
    pub levels: Vec<HierarchicalIntegrityLevelInfo>,
    #[brw(pad_size_to = 0x20)]
    pub signature_salt: [u8; 0x20],
}

#[binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct HierarchicalIntegrityLevelInfo {
    pub offset: u64,
    pub size: u64,
    pub block_size_log2: u32,
    pub _reserved: [u8; 0x4],
}

#[binrw]
#[brw(little)]
#[derive(Debug)]
/// NCA filesystem header, one of up to four, each 0x200 bytes, located at
/// `0x400 + section_index * 0x200` in the decrypted header region.
pub struct FsHeader {
    pub version: u16,
    pub fs_type: FsType,
    pub hash_type: HashType,
    pub encryption_type: EncryptionType,
    pub metadata_hash_type: MetaDataHashType,
    _reserved: [u8; 0x2],
    #[brw(pad_size_to = 0xF8)]
    #[br(args(hash_type))]
    pub hash_data: HashData,
    #[br(count = 0x40)]
    #[brw(pad_size_to = 0x40)]
    pub patch_info: Vec<u8>,
    pub ctr: u64,
    #[br(count = 0x30)]
    #[brw(pad_size_to = 0x30)]
    pub sparse_info: Vec<u8>,
    #[br(count = 0x28)]
    #[brw(pad_size_to = 0x28)]
    pub compression_info: Vec<u8>,
    #[br(count = 0x30)]
    #[brw(pad_size_to = 0x30)]
    pub metadata_hashdata_info: Vec<u8>,
    #[br(count = 0x30)]
    #[brw(pad_size_to = 0x30)]
    _reserved2: Vec<u8>,
}
