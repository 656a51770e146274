//! Provides the metadata (attributes) of a database.
//!
//! An attribute is identified by a category and a name (e.g. "Territory" / "Id") and carries one
//! or more values. All strings are stored in the "attributes" dictionary volume.
use crate::db::{Database, PayloadWriter, Record};
use crate::dictionary::{Dictionary, StringId, VolumeId};

/// Contains the maximal number of values per attribute.
pub const MAX_VALUES: usize = 64;

/// Contains the name of the dictionary volume used for all attribute strings.
pub const VOLUME: &str = "attributes";

struct Attribute {
    category: StringId,
    name: StringId,
    values: Vec<StringId>,
}

struct AttributeRecord {
    category: StringId,
    name: StringId,
    value_first: u16,
    value_count: u16,
}

impl Record for AttributeRecord {
    const SIZE: usize = 8;

    fn write(&self, out: &mut PayloadWriter) {
        out.put_u16(self.category);
        out.put_u16(self.name);
        out.put_u16(self.value_first);
        out.put_u16(self.value_count);
    }
}

/// Contains all attributes of a build.
#[derive(Default)]
pub struct MetadataTable {
    attributes: Vec<Attribute>,
}

impl MetadataTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        MetadataTable::default()
    }

    fn find(&self, category: StringId, name: StringId) -> Option<usize> {
        self.attributes
            .iter()
            .position(|attribute| attribute.category == category && attribute.name == name)
    }

    fn volume(dictionary: &mut Dictionary) -> anyhow::Result<VolumeId> {
        dictionary.open(VOLUME)
    }

    /// Defines an attribute along with its first value.
    ///
    /// Defining an attribute again with the same value is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if the attribute is already defined with another value.
    ///
    /// # Example
    ///
    /// ```
    /// # use buildmap::dictionary::Dictionary;
    /// # use buildmap::metadata::MetadataTable;
    /// let mut dictionary = Dictionary::new();
    /// let mut metadata = MetadataTable::new();
    /// metadata.add_attribute(&mut dictionary, "Territory", "Id", "06075").unwrap();
    /// metadata.add_attribute(&mut dictionary, "Territory", "Id", "06075").unwrap();
    /// assert_eq!(metadata.add_attribute(&mut dictionary, "Territory", "Id", "06001").is_err(), true);
    /// assert_eq!(metadata.len(), 1);
    /// ```
    pub fn add_attribute(
        &mut self,
        dictionary: &mut Dictionary,
        category: &str,
        name: &str,
        value: &str,
    ) -> anyhow::Result<()> {
        let volume = Self::volume(dictionary)?;
        let coded_category = dictionary.add(volume, category)?;
        let coded_name = dictionary.add(volume, name)?;
        let coded_value = dictionary.add(volume, value)?;

        match self.find(coded_category, coded_name) {
            Some(index) if self.attributes[index].values.first() != Some(&coded_value) => Err(
                anyhow::anyhow!("attribute {}.{} changed to {}", category, name, value),
            ),
            Some(_) => Ok(()),
            None => {
                self.attributes.push(Attribute {
                    category: coded_category,
                    name: coded_name,
                    values: vec![coded_value],
                });
                Ok(())
            }
        }
    }

    /// Adds another value to an existing attribute.
    ///
    /// # Errors
    ///
    /// Fails if the attribute is unknown or if it already has [MAX_VALUES] values.
    pub fn add_value(
        &mut self,
        dictionary: &mut Dictionary,
        category: &str,
        name: &str,
        value: &str,
    ) -> anyhow::Result<()> {
        let volume = Self::volume(dictionary)?;
        let index = dictionary
            .locate(volume, category)
            .zip(dictionary.locate(volume, name))
            .and_then(|(category, name)| self.find(category, name))
            .ok_or_else(|| anyhow::anyhow!("attribute {}.{} not found", category, name))?;

        if self.attributes[index].values.len() >= MAX_VALUES {
            return Err(anyhow::anyhow!(
                "too many values for attribute {}.{}",
                category,
                name
            ));
        }

        let coded_value = dictionary.add(volume, value)?;
        self.attributes[index].values.push(coded_value);

        Ok(())
    }

    /// Returns the values of the given attribute.
    pub fn get<'a>(
        &self,
        dictionary: &'a Dictionary,
        category: &str,
        name: &str,
    ) -> Vec<&'a str> {
        let Some(volume) = dictionary.volume(VOLUME) else {
            return Vec::new();
        };

        dictionary
            .locate(volume, category)
            .zip(dictionary.locate(volume, name))
            .and_then(|(category, name)| self.find(category, name))
            .map(|index| {
                self.attributes[index]
                    .values
                    .iter()
                    .filter_map(|value| dictionary.get_str(volume, *value))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Determines if there are no attributes at all.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Writes the "metadata" section.
    pub fn save(&self, db: &mut Database) -> anyhow::Result<()> {
        log::info!("Saving {} attributes...", self.attributes.len());

        let mut records = Vec::with_capacity(self.attributes.len());
        let mut values = Vec::new();
        for attribute in self.attributes.iter() {
            records.push(AttributeRecord {
                category: attribute.category,
                name: attribute.name,
                value_first: values.len() as u16,
                value_count: attribute.values.len() as u16,
            });
            values.extend(attribute.values.iter().copied());
        }

        let root = db.add_section(None, "metadata")?;
        let _ = db.add_records(root, "attributes", &records)?;
        let _ = db.add_records(root, "values", &values)?;

        Ok(())
    }

    /// Logs the statistics of this table.
    pub fn summary(&self) {
        log::info!(
            "Metadata table: {} attributes, {} used",
            self.attributes.len(),
            crate::fmt::format_size(self.attributes.len() * AttributeRecord::SIZE)
        );
    }

    /// Discards all attributes.
    pub fn reset(&mut self) {
        self.attributes.clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::db::reader::Image;
    use crate::db::{ByteOrder, Database};
    use crate::dictionary::Dictionary;
    use crate::metadata::{MetadataTable, MAX_VALUES};

    #[test]
    fn values_can_be_appended() {
        let mut dictionary = Dictionary::new();
        let mut metadata = MetadataTable::new();
        assert_eq!(
            metadata
                .add_value(&mut dictionary, "Territory", "Parent", "06")
                .is_err(),
            true
        );

        metadata
            .add_attribute(&mut dictionary, "Territory", "Parent", "06")
            .unwrap();
        metadata
            .add_value(&mut dictionary, "Territory", "Parent", "us")
            .unwrap();
        assert_eq!(
            metadata.get(&dictionary, "Territory", "Parent"),
            vec!["06", "us"]
        );
        assert_eq!(metadata.get(&dictionary, "Territory", "Unknown").is_empty(), true);

        for index in 2..MAX_VALUES {
            metadata
                .add_value(&mut dictionary, "Territory", "Parent", &index.to_string())
                .unwrap();
        }
        assert_eq!(
            metadata
                .add_value(&mut dictionary, "Territory", "Parent", "overflow")
                .is_err(),
            true
        );

        let mut db = Database::in_memory(ByteOrder::Little);
        metadata.save(&mut db).unwrap();
        let image = db.finish().unwrap();
        let image = Image::parse(&image, ByteOrder::Little).unwrap();
        assert_eq!(image.find("metadata/attributes").unwrap().count(), 1);
        assert_eq!(
            image.find("metadata/values").unwrap().count(),
            MAX_VALUES as i32
        );
    }
}
