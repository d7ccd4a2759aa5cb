pub mod error;
pub mod archive;
pub mod codec;
pub mod stream;
pub mod crypto;
pub mod names;
pub mod version;
pub mod property;
pub mod mapper;
pub mod profile;
pub mod summary;
pub mod batch;

pub use error::{Error, ErrorClass, ErrorKind, Result};
pub use archive::{Archive, ArchiveWriter, MemorySource, Source};
pub use codec::{get_codec, CompressionMethod};
pub use stream::{encode_chunked, CompressedSource};
pub use crypto::{AesKey, DecryptionContext};
pub use names::{NameTable, NameToken};
pub use version::{CustomVersionTable, EngineVersion, Guid};
pub use property::{PropertyDecoder, PropertyTag, StructFallback, Value};
pub use mapper::{Reflect, StructMapper};
pub use profile::{ProfileRegistry, TitleProfile};
pub use summary::{Package, PackageSummary};
