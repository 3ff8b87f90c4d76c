//! The printer's file storage. Nothing here touches disk: uploads are kept in
//! memory and seeded names only carry metadata.

use bytes::Bytes;
use flashforge::{http::GcodeListEntry, material::ToolData};

use super::StateError;

/// Files every fresh emulator starts with.
pub const DEFAULT_FILES: [&str; 3] = ["test.3mf", "test2.gcode", "test3.gcode.gx"];

/// How many files the recent-file listing returns.
pub const RECENT_LIMIT: usize = 10;

/// What the printer knows about a stored file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    /// Estimated print time in seconds.
    pub printing_time: u64,
    /// Size in bytes.
    pub file_size: u64,
    /// Estimated filament in grams.
    pub total_filament_weight: f64,
    /// Layer count.
    pub total_layers: u32,
    /// Whether the job feeds from the material station.
    pub use_matl_station: bool,
    /// Number of tools used.
    pub tool_count: u32,
    /// Per-tool material use.
    pub tool_datas: Vec<ToolData>,
}

impl Default for FileMetadata {
    fn default() -> Self {
        FileMetadata {
            printing_time: 3600,
            file_size: 1024 * 1024,
            total_filament_weight: 25.5,
            total_layers: 100,
            use_matl_station: false,
            tool_count: 1,
            tool_datas: Vec::new(),
        }
    }
}

impl FileMetadata {
    /// Metadata assumed for a file we have no upload headers for. Names of
    /// `.3mf` files mentioning `multi` get a three colour sample job.
    pub fn default_for(name: &str) -> Self {
        if !(name.ends_with(".3mf") && name.to_lowercase().contains("multi")) {
            return FileMetadata::default();
        }

        let tool = |tool_id: i64, name: &str, color: &str, weight: f64| ToolData {
            tool_id,
            slot_id: tool_id + 1,
            material_name: name.to_string(),
            material_color: color.to_string(),
            filament_weight: weight,
        };

        FileMetadata {
            printing_time: 7200,
            total_filament_weight: 41.1,
            use_matl_station: true,
            tool_count: 3,
            tool_datas: vec![
                tool(0, "PLA", "#FF0000", 15.2),
                tool(1, "PLA", "#00FF00", 13.8),
                tool(2, "ABS", "#0000FF", 12.1),
            ],
            ..FileMetadata::default()
        }
    }

    /// The detailed `/gcodeList` entry for this file.
    pub fn list_entry(&self, name: &str) -> GcodeListEntry {
        GcodeListEntry {
            gcode_file_name: name.to_string(),
            printing_time: self.printing_time,
            total_filament_weight: self.total_filament_weight,
            use_matl_station: self.use_matl_station,
            gcode_tool_cnt: self.tool_count,
            gcode_tool_datas: self.tool_datas.clone(),
        }
    }
}

/// A stored file.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualFile {
    /// File name, unique in the registry.
    pub name: String,
    /// Metadata, defaulted for seeded files.
    pub metadata: FileMetadata,
    /// Uploaded contents.
    pub data: Option<Bytes>,
    /// A thumbnail specific to this file.
    pub thumbnail: Option<Vec<u8>>,
}

impl VirtualFile {
    fn seeded(name: &str) -> Self {
        VirtualFile {
            name: name.to_string(),
            metadata: FileMetadata::default_for(name),
            data: None,
            thumbnail: None,
        }
    }
}

/// Trim a file name and reject empty names and paths.
fn valid_name(name: &str) -> Result<&str, StateError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.contains('/') {
        return Err(StateError::InvalidFileName(name.to_string()));
    }
    Ok(trimmed)
}

/// Ordered set of stored files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileRegistry {
    files: Vec<VirtualFile>,
}

impl FileRegistry {
    /// A registry holding the given names, in order. Duplicates are dropped.
    pub fn with_names<S: AsRef<str>>(names: impl IntoIterator<Item = S>) -> Self {
        let mut registry = FileRegistry::default();
        for name in names {
            let name = name.as_ref();
            if !name.is_empty() && !registry.contains(name) {
                registry.files.push(VirtualFile::seeded(name));
            }
        }
        registry
    }

    /// The factory file set.
    pub fn defaults() -> Self {
        Self::with_names(DEFAULT_FILES)
    }

    /// Replace everything with the factory file set.
    pub fn restore_defaults(&mut self) {
        *self = Self::defaults();
    }

    /// Whether a file exists.
    pub fn contains(&self, name: &str) -> bool {
        self.files.iter().any(|f| f.name == name)
    }

    /// Look up a file.
    pub fn get(&self, name: &str) -> Option<&VirtualFile> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Every name, in registry order.
    pub fn names(&self) -> Vec<String> {
        self.files.iter().map(|f| f.name.clone()).collect()
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Add a named file with default metadata. `.3mf` is appended when the
    /// name has no extension. Returns the stored name.
    pub fn add(&mut self, name: &str) -> Result<String, StateError> {
        let name = valid_name(name)?;

        let name = if name.contains('.') {
            name.to_string()
        } else {
            format!("{name}.3mf")
        };
        if self.contains(&name) {
            return Err(StateError::DuplicateFile(name));
        }

        self.files.push(VirtualFile::seeded(&name));
        Ok(name)
    }

    /// Store uploaded contents, replacing a file of the same name in place.
    pub fn upload(&mut self, name: &str, data: Bytes, metadata: FileMetadata) -> Result<(), StateError> {
        let name = valid_name(name)?;

        let file = VirtualFile {
            name: name.to_string(),
            metadata,
            data: Some(data),
            thumbnail: None,
        };
        match self.files.iter_mut().find(|f| f.name == name) {
            Some(existing) => *existing = file,
            None => self.files.push(file),
        }
        Ok(())
    }

    /// Remove a file.
    pub fn remove(&mut self, name: &str) -> Result<VirtualFile, StateError> {
        let index = self
            .files
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| StateError::FileNotFound(name.to_string()))?;
        Ok(self.files.remove(index))
    }

    /// Attach a thumbnail to a file.
    pub fn set_thumbnail(&mut self, name: &str, png: Vec<u8>) -> Result<(), StateError> {
        let file = self
            .files
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| StateError::FileNotFound(name.to_string()))?;
        file.thumbnail = Some(png);
        Ok(())
    }

    /// The recent-file listing: names sorted, capped at [`RECENT_LIMIT`].
    pub fn recent(&self) -> Vec<&VirtualFile> {
        let mut files: Vec<&VirtualFile> = self.files.iter().collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        files.truncate(RECENT_LIMIT);
        files
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let registry = FileRegistry::defaults();
        assert_eq!(registry.names(), vec!["test.3mf", "test2.gcode", "test3.gcode.gx"]);
        assert_eq!(registry.get("test.3mf").unwrap().metadata, FileMetadata::default());
    }

    #[test]
    fn test_add_appends_extension() {
        let mut registry = FileRegistry::defaults();
        assert_eq!(registry.add("benchy").unwrap(), "benchy.3mf");
        assert!(registry.contains("benchy.3mf"));
        assert!(matches!(registry.add("benchy.3mf"), Err(StateError::DuplicateFile(_))));
        assert!(matches!(registry.add("  "), Err(StateError::InvalidFileName(_))));
    }

    #[test]
    fn test_upload_rejects_paths() {
        let mut registry = FileRegistry::defaults();
        for name in ["../etc/passwd", "sub/cube.gcode", " "] {
            let result = registry.upload(name, Bytes::from_static(b"G28"), FileMetadata::default());
            assert!(matches!(result, Err(StateError::InvalidFileName(_))), "{name:?}");
        }
        assert!(matches!(registry.add("sub/cube"), Err(StateError::InvalidFileName(_))));
        assert_eq!(registry.len(), 3);

        registry
            .upload(" cube.gcode ", Bytes::from_static(b"G28"), FileMetadata::default())
            .unwrap();
        assert!(registry.contains("cube.gcode"));
    }

    #[test]
    fn test_multicolor_sample() {
        let registry = FileRegistry::with_names(["Multi_Color_Cube.3mf", "multi.gcode"]);
        let cube = &registry.get("Multi_Color_Cube.3mf").unwrap().metadata;
        assert_eq!(cube.tool_count, 3);
        assert!(cube.use_matl_station);
        assert_eq!(cube.tool_datas[2].slot_id, 3);

        assert_eq!(registry.get("multi.gcode").unwrap().metadata.tool_count, 1);
    }

    #[test]
    fn test_upload_replaces_in_place() {
        let mut registry = FileRegistry::defaults();
        registry
            .upload("test.3mf", Bytes::from_static(b"G28"), FileMetadata::default())
            .unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.names()[0], "test.3mf");
        assert_eq!(registry.get("test.3mf").unwrap().data.as_deref(), Some(&b"G28"[..]));
    }

    #[test]
    fn test_remove_and_restore() {
        let mut registry = FileRegistry::defaults();
        registry.remove("test2.gcode").unwrap();
        assert!(matches!(registry.remove("test2.gcode"), Err(StateError::FileNotFound(_))));
        assert_eq!(registry.len(), 2);

        registry.restore_defaults();
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_recent_is_sorted_and_capped() {
        let names: Vec<String> = (0..15).rev().map(|i| format!("part{i:02}.gcode")).collect();
        let registry = FileRegistry::with_names(&names);
        let recent: Vec<&str> = registry.recent().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(recent.len(), RECENT_LIMIT);
        assert_eq!(recent[0], "part00.gcode");
        assert_eq!(recent[9], "part09.gcode");
    }
}
