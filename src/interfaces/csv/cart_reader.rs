use crate::domain::cart::{Cart, LineItem};
use crate::error::{PosError, Result};
use std::io::Read;

/// Reads cart line items from CSV.
///
/// Expects the header `id,name,unit_price,quantity,category,requires_shipping`;
/// the last column may be omitted. Whitespace around fields is trimmed.
pub struct CartReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CartReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes one line item per row.
    pub fn items(self) -> impl Iterator<Item = Result<LineItem>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PosError::from))
    }

    /// Reads every row; the first malformed row aborts the read.
    pub fn read_cart(self) -> Result<Cart> {
        let items = self.items().collect::<Result<Vec<_>>>()?;
        Ok(Cart::new(items))
    }
}
