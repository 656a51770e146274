//! Provides the string dictionary which interns all names stored in a map database.
//!
//! A dictionary consists of named **volumes** (e.g. "street", "city"). Each volume maps byte
//! strings to dense 16 bit codes. The code 0 is always the empty string. Lookups are case
//! insensitive, but the bytes returned by [Dictionary::get] are the ones of the first string
//! which was added for a given spelling.
//!
//! # Example
//!
//! ```
//! # use buildmap::dictionary::Dictionary;
//! let mut dictionary = Dictionary::new();
//! let streets = dictionary.open("street").unwrap();
//!
//! let main = dictionary.add(streets, "Main").unwrap();
//! assert_eq!(dictionary.add(streets, "MAIN").unwrap(), main);
//! assert_eq!(dictionary.get_str(streets, main), Some("Main"));
//! assert_eq!(dictionary.locate(streets, "main"), Some(main));
//! assert_eq!(dictionary.locate(streets, "Elm"), None);
//! assert_eq!(dictionary.add(streets, "").unwrap(), 0);
//! ```
use anyhow::Context;
use fnv::FnvHashMap;

use crate::db::{Database, PayloadWriter, Record, SectionId};
use crate::dictionary::trie::{Child, Trie, Walk};

pub mod trie;

pub use trie::StringId;

/// Contains the maximal number of volumes per dictionary.
pub const MAX_VOLUMES: usize = 16;

/// Contains the maximal number of strings per volume (the last code is never handed out).
pub const MAX_STRINGS: usize = 0xFFFF;

/// Contains the maximal number of string bytes per volume (offsets are limited to 24 bits).
pub const MAX_DATA: usize = 0x1000000;

const TYPE_TREE: u8 = 1;
const TYPE_STRING: u8 = 2;

/// Represents a handle to a volume of a [Dictionary].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VolumeId(usize);

struct TreeRecord {
    first: u32,
    count: u16,
    position: u16,
}

impl Record for TreeRecord {
    const SIZE: usize = 8;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_u32(self.first);
        out.put_u16(self.count);
        out.put_u16(self.position);
    }
}

struct ReferenceRecord {
    character: u8,
    kind: u8,
    index: u16,
}

impl Record for ReferenceRecord {
    const SIZE: usize = 4;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_u8(self.character);
        out.put_u8(self.kind);
        out.put_u16(self.index);
    }
}

/// Returns the NUL terminated string starting at the given offset.
fn string_at<'a>(data: &'a [u8], index: &[u32], id: StringId) -> &'a [u8] {
    let start = index.get(id as usize).copied().unwrap_or(0) as usize;
    let tail = data.get(start..).unwrap_or_default();
    let len = tail.iter().position(|b| *b == 0).unwrap_or(tail.len());
    &tail[..len]
}

fn same_string(stored: &[u8], string: &[u8]) -> bool {
    stored.len() == string.len() && stored.eq_ignore_ascii_case(string)
}

struct Volume {
    name: String,
    data: Vec<u8>,
    index: Vec<u32>,
    trie: Trie,
    hits: usize,
}

impl Volume {
    fn new(name: &str) -> anyhow::Result<Self> {
        let mut volume = Volume {
            name: name.to_owned(),
            data: vec![0],
            index: vec![0],
            trie: Trie::new(),
            hits: 0,
        };

        let root = volume.trie.root();
        volume.trie.insert(root, b"", 0, |_| b"")?;

        Ok(volume)
    }

    fn string(&self, id: StringId) -> Option<&[u8]> {
        if id as usize >= self.index.len() {
            None
        } else {
            Some(string_at(&self.data, &self.index, id))
        }
    }

    fn search(&self, string: &[u8]) -> anyhow::Result<Result<StringId, usize>> {
        let walk = self
            .trie
            .walk(string)
            .with_context(|| format!("Corrupted dictionary {}", self.name))?;

        Ok(match walk {
            Walk::Candidate(node, id) => match self.string(id) {
                Some(stored) if same_string(stored, string) => Ok(id),
                _ => Err(node),
            },
            Walk::Miss(node) => Err(node),
        })
    }

    fn add(&mut self, string: &[u8]) -> anyhow::Result<StringId> {
        if string.is_empty() {
            return Ok(0);
        }
        if string.contains(&0) {
            return Err(anyhow::anyhow!(
                "cannot add a string containing a NUL byte to dictionary {}",
                self.name
            ));
        }

        let start = match self.search(string)? {
            Ok(id) => {
                self.hits += 1;
                return Ok(id);
            }
            Err(node) => node,
        };

        if self.index.len() >= MAX_STRINGS {
            return Err(anyhow::anyhow!("dictionary {} full (index)", self.name));
        }
        if self.data.len() + string.len() + 1 >= MAX_DATA {
            return Err(anyhow::anyhow!("dictionary {} full (data)", self.name));
        }

        let id = self.index.len() as StringId;
        let Volume {
            name,
            data,
            index,
            trie,
            ..
        } = self;
        {
            let strings: &[u8] = data;
            let offsets: &[u32] = index;
            trie.insert(start, string, id, |existing| {
                string_at(strings, offsets, existing)
            })
            .with_context(|| format!("Cannot add to dictionary {}", name))?;
        }

        index.push(data.len() as u32);
        data.extend_from_slice(string);
        data.push(0);

        Ok(id)
    }

    fn save(&self, db: &mut Database, parent: SectionId) -> anyhow::Result<()> {
        let preorder = self.trie.compressed_preorder();
        let positions: FnvHashMap<usize, usize> = preorder
            .iter()
            .enumerate()
            .map(|(position, node)| (*node, position))
            .collect();

        let mut trees = Vec::with_capacity(preorder.len());
        let mut references = Vec::new();
        for node in preorder.iter() {
            let node = self
                .trie
                .node(*node)
                .ok_or_else(|| anyhow::anyhow!("corrupted dictionary {}", self.name))?;
            trees.push(TreeRecord {
                first: references.len() as u32,
                count: node.references.len() as u16,
                position: u16::try_from(node.position)
                    .context("dictionary string too long")?,
            });

            for reference in node.references.iter() {
                let (kind, index) = match reference.child {
                    Child::Leaf(id) => (TYPE_STRING, id),
                    Child::Node(next) => {
                        let next = self.trie.compressed(next);
                        let index = positions.get(&next).copied().ok_or_else(|| {
                            anyhow::anyhow!("corrupted tree count in dictionary {}", self.name)
                        })?;
                        (TYPE_TREE, index as u16)
                    }
                };
                references.push(ReferenceRecord {
                    character: reference.character,
                    kind,
                    index,
                });
            }
        }

        let section = db.add_section(Some(parent), &self.name)?;
        let _ = db.add_records(section, "tree", &trees)?;
        let _ = db.add_records(section, "node", &references)?;
        let _ = db.add_records(section, "index", &self.index)?;
        let _ = db.add_records(section, "data", &self.data)?;

        Ok(())
    }

    fn size(&self) -> usize {
        self.data.len()
            + self.trie.num_references() * ReferenceRecord::SIZE
            + self.trie.num_nodes() * TreeRecord::SIZE
            + self.index.len() * 4
    }
}

/// Contains all volumes of a build.
#[derive(Default)]
pub struct Dictionary {
    volumes: Vec<Volume>,
}

impl Dictionary {
    /// Creates an empty dictionary.
    pub fn new() -> Self {
        Dictionary::default()
    }

    /// Opens the volume with the given name.
    ///
    /// Opening the same name twice yields the same volume. A new volume already contains the
    /// empty string with code 0.
    ///
    /// # Errors
    ///
    /// Fails if there are already [MAX_VOLUMES] volumes.
    pub fn open(&mut self, name: &str) -> anyhow::Result<VolumeId> {
        if let Some(volume) = self.volume(name) {
            return Ok(volume);
        }
        if self.volumes.len() >= MAX_VOLUMES {
            return Err(anyhow::anyhow!(
                "too many dictionary volumes (cannot open {})",
                name
            ));
        }

        self.volumes.push(Volume::new(name)?);
        Ok(VolumeId(self.volumes.len() - 1))
    }

    /// Returns the volume with the given name, if it has been opened.
    pub fn volume(&self, name: &str) -> Option<VolumeId> {
        self.volumes
            .iter()
            .position(|volume| volume.name == name)
            .map(VolumeId)
    }

    fn volume_ref(&self, volume: VolumeId) -> anyhow::Result<&Volume> {
        self.volumes
            .get(volume.0)
            .ok_or_else(|| anyhow::anyhow!("unknown dictionary volume {}", volume.0))
    }

    /// Interns the given string and returns its code.
    ///
    /// Adding a string which is already present (ignoring case) returns the existing code.
    ///
    /// # Errors
    ///
    /// Fails if the string contains a NUL byte, if the volume is full or if its trie turns out
    /// to be corrupted.
    pub fn add(&mut self, volume: VolumeId, string: impl AsRef<[u8]>) -> anyhow::Result<StringId> {
        self.volumes
            .get_mut(volume.0)
            .ok_or_else(|| anyhow::anyhow!("unknown dictionary volume {}", volume.0))?
            .add(string.as_ref())
    }

    /// Returns the bytes stored for the given code.
    pub fn get(&self, volume: VolumeId, code: StringId) -> Option<&[u8]> {
        self.volumes.get(volume.0)?.string(code)
    }

    /// Returns the string stored for the given code if it is valid UTF-8.
    pub fn get_str(&self, volume: VolumeId, code: StringId) -> Option<&str> {
        std::str::from_utf8(self.get(volume, code)?).ok()
    }

    /// Searches the code of the given string without adding it.
    pub fn locate(&self, volume: VolumeId, string: impl AsRef<[u8]>) -> Option<StringId> {
        self.volumes
            .get(volume.0)?
            .search(string.as_ref())
            .ok()?
            .ok()
    }

    /// Returns the number of strings (including the empty one) in the given volume.
    pub fn len(&self, volume: VolumeId) -> usize {
        self.volume_ref(volume)
            .map(|volume| volume.index.len())
            .unwrap_or(0)
    }

    /// Determines if no volume has been opened.
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Writes all volumes into a section named "string".
    ///
    /// Volumes whose name starts with a "." are only used during the build and are skipped.
    pub fn save(&self, db: &mut Database) -> anyhow::Result<()> {
        let strings = db.add_section(None, "string")?;
        for volume in self
            .volumes
            .iter()
            .filter(|volume| !volume.name.starts_with('.'))
        {
            volume
                .save(db, strings)
                .with_context(|| format!("Cannot save dictionary {}", volume.name))?;
        }

        Ok(())
    }

    /// Logs the statistics of all volumes.
    pub fn summary(&self) {
        let mut total_strings = 0;
        let mut total_hits = 0;
        let mut total_size = 0;
        for volume in self.volumes.iter() {
            log::info!(
                "Dictionary {}: {} items, {} hits, {} ({} references, {} nodes)",
                volume.name,
                volume.index.len(),
                volume.hits,
                crate::fmt::format_size(volume.size()),
                volume.trie.num_references(),
                volume.trie.num_nodes()
            );
            total_strings += volume.index.len();
            total_hits += volume.hits;
            total_size += volume.size();
        }

        log::info!(
            "Dictionary totals: {} items, {} hits, {}",
            total_strings,
            total_hits,
            crate::fmt::format_size(total_size)
        );
    }

    /// Discards all volumes.
    pub fn reset(&mut self) {
        self.volumes.clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::db::reader::Image;
    use crate::db::{ByteOrder, Database};
    use crate::dictionary::trie::character_at;
    use crate::dictionary::{Dictionary, MAX_VOLUMES};

    #[test]
    fn case_variants_share_the_first_spelling() {
        let mut dictionary = Dictionary::new();
        let streets = dictionary.open("street").unwrap();

        let first = dictionary.add(streets, "Main").unwrap();
        assert_eq!(dictionary.add(streets, "Main").unwrap(), first);
        assert_eq!(dictionary.add(streets, "MAIN").unwrap(), first);
        assert_eq!(dictionary.get_str(streets, first), Some("Main"));
        assert_eq!(dictionary.len(streets), 2);
    }

    #[test]
    fn prefixes_are_kept_apart() {
        let mut dictionary = Dictionary::new();
        let streets = dictionary.open("street").unwrap();

        let names = ["Main", "Mainz", "Mai", "Maple", "M", "Elm", "Elmwood", "elm"];
        let codes: Vec<u16> = names
            .iter()
            .map(|name| dictionary.add(streets, name).unwrap())
            .collect();

        assert_eq!(codes, vec![1, 2, 3, 4, 5, 6, 7, 6]);
        for (name, code) in names.iter().zip(codes.iter()).take(7) {
            assert_eq!(dictionary.get_str(streets, *code), Some(*name));
            assert_eq!(dictionary.locate(streets, name), Some(*code));
        }
        assert_eq!(dictionary.locate(streets, "Ma"), None);
        assert_eq!(dictionary.locate(streets, "Mainzer"), None);
        assert_eq!(dictionary.get(streets, 100), None);
    }

    #[test]
    fn volumes_are_opened_once_and_limited() {
        let mut dictionary = Dictionary::new();
        let streets = dictionary.open("street").unwrap();
        assert_eq!(dictionary.open("street").unwrap(), streets);
        assert_eq!(dictionary.locate(streets, ""), Some(0));

        for index in 1..MAX_VOLUMES {
            let _ = dictionary.open(&format!("volume{}", index)).unwrap();
        }
        assert_eq!(dictionary.open("one-too-many").is_err(), true);

        dictionary.reset();
        assert_eq!(dictionary.is_empty(), true);
        assert_eq!(dictionary.volume("street"), None);
    }

    #[test]
    fn nul_bytes_are_rejected() {
        let mut dictionary = Dictionary::new();
        let streets = dictionary.open("street").unwrap();
        assert_eq!(dictionary.add(streets, b"Ma\0in").is_err(), true);
    }

    #[test]
    fn many_strings_can_be_interned() {
        let mut dictionary = Dictionary::new();
        let cities = dictionary.open("city").unwrap();

        for round in 0..2 {
            for index in 0..5_000 {
                let name = format!("City {} of {}", index, index % 7);
                let code = dictionary.add(cities, &name).unwrap();
                assert_eq!(code as usize, index + 1);
                if round == 1 {
                    assert_eq!(dictionary.get_str(cities, code), Some(name.as_str()));
                }
            }
        }
        assert_eq!(dictionary.len(cities), 5_001);
    }

    /// Searches a string by walking the persisted (compressed) tree like a map viewer would.
    fn search_image(image: &Image, volume: &str, string: &str) -> Option<u16> {
        let tree = image.find(&format!("string/{}/tree", volume))?;
        let node = image.find(&format!("string/{}/node", volume))?;
        let mut current = 0;
        loop {
            let first = tree.i32_at_byte(current * 8)? as usize;
            let count = tree.u16_at_byte(current * 8 + 4)? as usize;
            let position = tree.u16_at_byte(current * 8 + 6)? as usize;
            let character = character_at(string.as_bytes(), position);

            let reference = (first..first + count).find(|r| node.data()[r * 4] == character)?;
            let index = node.u16_at_byte(reference * 4 + 2)?;
            match node.data()[reference * 4 + 1] {
                2 => return Some(index),
                _ => current = index as usize,
            }
        }
    }

    #[test]
    fn saved_volumes_can_be_searched() {
        let mut dictionary = Dictionary::new();
        let streets = dictionary.open("street").unwrap();
        let hidden = dictionary.open(".internal").unwrap();
        let _ = dictionary.add(hidden, "secret").unwrap();

        let names = ["Main", "Mainz", "Maple", "Market", "Elm", "Oak", "Oakland"];
        for name in names {
            let _ = dictionary.add(streets, name).unwrap();
        }

        let mut db = Database::in_memory(ByteOrder::Big);
        dictionary.save(&mut db).unwrap();
        let image = db.finish().unwrap();
        let image = Image::parse(&image, ByteOrder::Big).unwrap();

        assert_eq!(image.find("string/.internal").is_none(), true);
        assert_eq!(image.find("string/street/index").unwrap().count(), 8);
        for name in names {
            let code = search_image(&image, "street", name).unwrap();
            assert_eq!(dictionary.get_str(streets, code), Some(name));

            let offset = image.find("string/street/index").unwrap().i32_at(code as usize);
            let data = image.find("string/street/data").unwrap().data();
            let offset = offset.unwrap() as usize;
            assert_eq!(&data[offset..offset + name.len()], name.as_bytes());
        }
        assert_eq!(search_image(&image, "street", ""), Some(0));
    }
}
