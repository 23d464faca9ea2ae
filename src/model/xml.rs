/// An owned XML element with namespace prefixes stripped from element and attribute names.
///
/// Text content of an element is the concatenation of its (trimmed) text nodes; mixed
/// content ordering is not preserved, event XML does not use it.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<XmlAttribute>,
    pub text: Option<String>,
    pub children: Vec<XmlElement>,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct XmlAttribute {
    pub name: String,
    pub value: String,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        XmlElement {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Depth-first search (self included) for the first element called `name`.
    pub fn find_descendant(&self, name: &str) -> Option<&XmlElement> {
        if self.name == name {
            return Some(self);
        }

        self.children
            .iter()
            .find_map(|child| child.find_descendant(name))
    }

    /// Trimmed text, empty when the element has none.
    pub fn trimmed_text(&self) -> &str {
        self.text.as_deref().map(str::trim).unwrap_or_default()
    }

    pub(crate) fn push_text(&mut self, text: &str) {
        match self.text {
            Some(ref mut existing) => existing.push_str(text),
            None => self.text = Some(text.to_owned()),
        }
    }
}
