use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusinessUnitId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuSkuId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessUnit {
    pub id: BusinessUnitId,
    pub code: String,
    pub name: String,
}

/// A sellable product of one business unit, used when synthesizing SKU
/// proposals for a routed lead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuSku {
    pub id: BuSkuId,
    pub business_unit_id: BusinessUnitId,
    pub code: String,
    pub name: String,
    pub category: String,
}
