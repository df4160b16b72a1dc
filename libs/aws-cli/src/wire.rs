//! JSON shapes printed by `aws ... --output json`. Only the fields read here
//! are declared, everything else is ignored.

use serde::Deserialize;

use resource_resolver::{TaggedResource, Tags};

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct AwsTag {
    // incomplete tags show up in real output, they are skipped
    #[serde(rename = "Key")]
    pub key: Option<String>,
    #[serde(rename = "Value")]
    pub value: Option<String>,
}

fn tags(raw: Vec<AwsTag>) -> Tags {
    raw.into_iter()
        .filter_map(|tag| Some((tag.key?, tag.value?)))
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeSubnets {
    #[serde(default)]
    pub subnets: Vec<Subnet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Subnet {
    pub subnet_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeKeyPairs {
    #[serde(default)]
    pub key_pairs: Vec<KeyPair>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyPair {
    pub key_name: String,
    #[serde(default)]
    pub tags: Vec<AwsTag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeSecurityGroups {
    #[serde(default)]
    pub security_groups: Vec<SecurityGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityGroup {
    pub group_id: String,
    #[serde(default)]
    pub tags: Vec<AwsTag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeFileSystems {
    #[serde(default)]
    pub file_systems: Vec<FileSystem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileSystem {
    pub file_system_id: String,
    #[serde(default)]
    pub tags: Vec<AwsTag>,
}

pub fn subnet_ids(out: &[u8]) -> serde_json::Result<Vec<String>> {
    let res: DescribeSubnets = serde_json::from_slice(out)?;
    Ok(res.subnets.into_iter().map(|s| s.subnet_id).collect())
}

/// keypairs are identified by name, that's what the cluster config wants
pub fn key_pairs(out: &[u8]) -> serde_json::Result<Vec<TaggedResource>> {
    let res: DescribeKeyPairs = serde_json::from_slice(out)?;
    Ok(res
        .key_pairs
        .into_iter()
        .map(|kp| TaggedResource::new(kp.key_name, tags(kp.tags)))
        .collect())
}

pub fn security_groups(out: &[u8]) -> serde_json::Result<Vec<TaggedResource>> {
    let res: DescribeSecurityGroups = serde_json::from_slice(out)?;
    Ok(res
        .security_groups
        .into_iter()
        .map(|sg| TaggedResource::new(sg.group_id, tags(sg.tags)))
        .collect())
}

pub fn file_systems(out: &[u8]) -> serde_json::Result<Vec<TaggedResource>> {
    let res: DescribeFileSystems = serde_json::from_slice(out)?;
    Ok(res
        .file_systems
        .into_iter()
        .map(|fs| TaggedResource::new(fs.file_system_id, tags(fs.tags)))
        .collect())
}
