//! Catalog of the USDA FoodData Central JSON releases

/// One downloadable FoodData Central release
#[derive(Debug, Clone)]
pub struct DatasetSpec {
    /// Release name; also the archive/file stem and the root key of the
    /// extracted document
    pub name: String,
    /// Archive URL
    pub url: String,
    /// Top-level key holding the record array
    pub root_key: String,
    /// Schema type of the array's elements
    pub root_type: String,
    /// Expected sha256 of the downloaded archive, when pinned
    pub sha256: Option<String>,
}

impl DatasetSpec {
    /// The root key equals the release name, and the root type is its
    /// singular form plus "Item": `FoundationFoods` -> `FoundationFoodItem`.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let name = name.into();
        let root_type = format!("{}Item", name.strip_suffix('s').unwrap_or(&name));
        Self {
            root_key: name.clone(),
            root_type,
            name,
            url: url.into(),
            sha256: None,
        }
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }
}

/// All known FoodData Central releases
pub fn catalog() -> Vec<DatasetSpec> {
    vec![
        DatasetSpec::new(
            "FoundationFoods",
            "https://fdc.nal.usda.gov/fdc-datasets/FoodData_Central_foundation_food_json_2021-10-28.zip",
        ),
        DatasetSpec::new(
            "SRLegacyFoods",
            "https://fdc.nal.usda.gov/fdc-datasets/FoodData_Central_sr_legacy_food_json_2021-10-28.zip",
        ),
        DatasetSpec::new(
            "SurveyFoods",
            "https://fdc.nal.usda.gov/fdc-datasets/FoodData_Central_survey_food_json_2021-10-28.zip",
        ),
        DatasetSpec::new(
            "BrandedFoods",
            "https://fdc.nal.usda.gov/fdc-datasets/FoodData_Central_branded_food_json_2021-10-28.zip",
        ),
    ]
}

/// Find a release by name, case-insensitively
pub fn find(name: &str) -> Option<DatasetSpec> {
    catalog()
        .into_iter()
        .find(|d| d.name.eq_ignore_ascii_case(name))
}
