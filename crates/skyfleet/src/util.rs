use std::collections::BTreeMap;

use anyhow::Context;
use skyfleet_cloud::{Ec2Api, Resolver};

/// 識別子を解決し、各インスタンスの公開アドレスを返す
pub async fn resolve_addresses<C: Ec2Api>(
    api: &C,
    identifiers: &[String],
) -> anyhow::Result<Vec<String>> {
    let instances = Resolver::new(api).instances(identifiers).await?;
    instances
        .iter()
        .map(|instance| {
            instance
                .public_ip
                .clone()
                .with_context(|| format!("インスタンス {} に公開アドレスがありません", instance.label()))
        })
        .collect()
}

/// KEY=VALUE 形式のタグ指定をパース
pub fn parse_tags(specs: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    let mut tags = BTreeMap::new();
    for spec in specs {
        let (key, value) = spec
            .split_once('=')
            .with_context(|| format!("タグは KEY=VALUE 形式で指定してください: '{spec}'"))?;
        tags.insert(key.to_string(), value.to_string());
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tags_splits_on_the_first_equals() {
        let tags = parse_tags(&["env=prod".to_string(), "note=a=b".to_string()]).unwrap();
        assert_eq!(tags["env"], "prod");
        assert_eq!(tags["note"], "a=b");
    }

    #[test]
    fn parse_tags_rejects_malformed_specs() {
        assert!(parse_tags(&["justakey".to_string()]).is_err());
    }
}
