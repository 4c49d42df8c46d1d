/// The part-level view of a package used by document-model code.
///
/// Comment handling only needs to read a handful of parts, write them back,
/// and wire relationships between them. `PartStore` captures exactly that so
/// the comment engine can run against any container implementation.
use crate::ooxml::opc::packuri::PackURI;

/// Trait representing an editable collection of package parts.
///
/// Relationship sources are partnames; package-level relationships use
/// [`PackURI::package`] as their source.
pub trait PartStore {
    /// Get the binary content of a part, or `None` if the package has no such part.
    fn get_part(&self, partname: &PackURI) -> Option<&[u8]>;

    /// Content type registered for a part.
    fn content_type(&self, partname: &PackURI) -> Option<&str>;

    /// Create or replace a part and register its content type.
    fn put_part(&mut self, partname: &PackURI, content_type: &str, blob: Vec<u8>);

    /// Add or reuse a relationship from `source` to `target`.
    ///
    /// Returns the relationship ID (rId). Calling this twice with the same
    /// arguments returns the same rId.
    fn ensure_relationship(&mut self, source: &PackURI, target: &PackURI, reltype: &str)
    -> String;

    /// Partnames targeted by the internal relationships of `reltype` from `source`,
    /// in relationship order.
    fn related_parts(&self, source: &PackURI, reltype: &str) -> Vec<PackURI>;

    /// Check if a part exists in the package.
    fn contains_part(&self, partname: &PackURI) -> bool {
        self.get_part(partname).is_some()
    }

    /// The first part related to `source` by `reltype`, if any.
    fn related_part(&self, source: &PackURI, reltype: &str) -> Option<PackURI> {
        self.related_parts(source, reltype).into_iter().next()
    }
}
