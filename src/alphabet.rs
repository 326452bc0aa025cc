use crate::error::DecodeError;
use crate::types::Label;

/// Number of labels in UTF-8 byte mode: one per byte value `1..=255`.
const UTF8_LABEL_COUNT: usize = 255;

/// Returns true when `byte` can start a codepoint, i.e. it is an ASCII byte
/// or a UTF-8 lead byte rather than a continuation byte.
pub fn byte_is_codepoint_boundary(byte: u8) -> bool {
    byte & 0xC0 != 0x80
}

/// Read-only mapping between integer labels and the strings they emit.
///
/// Two encodings exist. In string mode every label carries one codepoint and
/// the space label (if any) is the label whose string is `" "`. In UTF-8 byte
/// mode label `i` stands for byte value `i + 1`, so transcripts are rebuilt
/// by concatenating bytes; byte 0 never occurs in text and has no label.
#[derive(Debug, Clone)]
pub struct Alphabet {
    labels: Vec<String>,
    space_label: Option<Label>,
    utf8: bool,
}

impl Alphabet {
    /// Builds a string-mode alphabet. Each label must be exactly one
    /// codepoint and labels must be distinct.
    pub fn new(labels: Vec<String>) -> Result<Self, DecodeError> {
        if labels.is_empty() {
            return Err(DecodeError::invalid_input("alphabet has no labels"));
        }
        for (i, label) in labels.iter().enumerate() {
            if label.chars().count() != 1 {
                return Err(DecodeError::invalid_input(format!(
                    "alphabet label {i} is not a single codepoint: {label:?}"
                )));
            }
            if labels[..i].contains(label) {
                return Err(DecodeError::invalid_input(format!(
                    "alphabet label {i} duplicates an earlier label: {label:?}"
                )));
            }
        }
        let space_label = labels.iter().position(|l| l == " ");
        Ok(Self {
            labels,
            space_label,
            utf8: false,
        })
    }

    /// Builds the UTF-8 byte-mode alphabet.
    pub fn utf8() -> Self {
        Self {
            labels: Vec::new(),
            space_label: Some((b' ' - 1) as Label),
            utf8: true,
        }
    }

    pub fn size(&self) -> usize {
        if self.utf8 {
            UTF8_LABEL_COUNT
        } else {
            self.labels.len()
        }
    }

    /// The CTC blank label, one past the last real label.
    pub fn blank_label(&self) -> Label {
        self.size()
    }

    pub fn space_label(&self) -> Option<Label> {
        self.space_label
    }

    pub fn is_utf8_mode(&self) -> bool {
        self.utf8
    }

    /// The string for a single label. `None` in UTF-8 byte mode, where an
    /// isolated label may be a continuation byte with no string form.
    pub fn string_from_label(&self, label: Label) -> Option<&str> {
        if self.utf8 {
            None
        } else {
            self.labels.get(label).map(String::as_str)
        }
    }

    /// Rebuilds text from a label sequence. Unknown labels are skipped in
    /// string mode; invalid byte sequences are replaced in UTF-8 mode.
    pub fn labels_to_string(&self, labels: &[Label]) -> String {
        if self.utf8 {
            let bytes: Vec<u8> = labels
                .iter()
                .filter(|&&l| l < UTF8_LABEL_COUNT)
                .map(|&l| l as u8 + 1)
                .collect();
            String::from_utf8_lossy(&bytes).into_owned()
        } else {
            labels
                .iter()
                .filter_map(|&l| self.labels.get(l).map(String::as_str))
                .collect()
        }
    }
}
