use std::time::Duration;

use anyhow::{Result, bail};

use crate::gateway::Gateway;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const POD_SELECTOR: &str = "app=wordpress";

struct SampleProduct {
    sku: &'static str,
    name: &'static str,
    price: &'static str,
    description: &'static str,
}

const SAMPLE_PRODUCTS: &[SampleProduct] = &[
    SampleProduct {
        sku: "URM-TEE-001",
        name: "Classic Tee",
        price: "19.99",
        description: "A soft everyday t-shirt.",
    },
    SampleProduct {
        sku: "URM-MUG-001",
        name: "Ceramic Mug",
        price: "12.50",
        description: "Holds 350ml of your favourite drink.",
    },
    SampleProduct {
        sku: "URM-CAP-001",
        name: "Baseball Cap",
        price: "14.00",
        description: "One size fits most.",
    },
    SampleProduct {
        sku: "URM-BAG-001",
        name: "Tote Bag",
        price: "9.99",
        description: "Reusable cotton tote.",
    },
    SampleProduct {
        sku: "URM-HDY-001",
        name: "Pullover Hoodie",
        price: "39.99",
        description: "Fleece-lined, unisex fit.",
    },
];

fn wp(args: &[&str]) -> Vec<String> {
    let mut argv = vec!["wp".to_string()];
    argv.extend(args.iter().map(|a| a.to_string()));
    argv.push("--allow-root".to_string());
    argv
}

/// Configure the freshly installed storefront: pages, payments, sample
/// catalog, settings, rewrites. Best-effort end to end; a storefront that
/// misses its sample catalog is still a working store, so failures are
/// logged and swallowed.
pub async fn run(gateway: &Gateway, namespace: &str, store_id: &str, hostname: &str) -> Result<()> {
    let pods = gateway.list_pods_by_label(namespace, POD_SELECTOR).await?;
    let Some(pod) = pods.first() else {
        bail!("no storefront pod found in {namespace}");
    };

    let steps: Vec<(&str, Vec<String>)> = vec![
        (
            "install storefront pages",
            wp(&["wc", "--user=admin", "tool", "run", "install_pages"]),
        ),
        (
            "enable cash on delivery",
            wp(&[
                "wc",
                "--user=admin",
                "payment_gateway",
                "update",
                "cod",
                "--enabled=true",
            ]),
        ),
        (
            "set store address",
            wp(&[
                "option",
                "update",
                "woocommerce_store_address",
                "1 Commerce Street",
            ]),
        ),
        (
            "set currency",
            wp(&["option", "update", "woocommerce_currency", "USD"]),
        ),
        (
            "set site url",
            wp(&["option", "update", "home", &format!("http://{hostname}")]),
        ),
        ("flush rewrite rules", wp(&["rewrite", "flush", "--hard"])),
    ];

    for (what, argv) in steps {
        run_step(gateway, namespace, pod, what, &argv).await;
    }

    for product in SAMPLE_PRODUCTS {
        create_product(gateway, namespace, pod, product).await;
    }

    tracing::info!(store_id, namespace, "post-install configuration finished");
    Ok(())
}

async fn run_step(gateway: &Gateway, namespace: &str, pod: &str, what: &str, argv: &[String]) {
    match gateway
        .exec_in_pod(namespace, pod, argv, COMMAND_TIMEOUT)
        .await
    {
        Ok(_) => tracing::debug!(namespace, step = what, "post-install step ok"),
        Err(e) => tracing::warn!(namespace, step = what, error = %e, "post-install step failed"),
    }
}

/// Products are idempotent by SKU: an existing SKU is left alone so the
/// hook can run again after a retried validation phase.
async fn create_product(gateway: &Gateway, namespace: &str, pod: &str, product: &SampleProduct) {
    let lookup = wp(&[
        "wc",
        "--user=admin",
        "product",
        "list",
        &format!("--sku={}", product.sku),
        "--field=id",
    ]);
    match gateway
        .exec_in_pod(namespace, pod, &lookup, COMMAND_TIMEOUT)
        .await
    {
        Ok(out) if !out.trim().is_empty() => {
            tracing::debug!(namespace, sku = product.sku, "product already present");
            return;
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(namespace, sku = product.sku, error = %e, "product lookup failed");
            return;
        }
    }

    let create = wp(&[
        "wc",
        "--user=admin",
        "product",
        "create",
        &format!("--name={}", product.name),
        &format!("--sku={}", product.sku),
        &format!("--regular_price={}", product.price),
        &format!("--description={}", product.description),
        "--status=publish",
    ]);
    run_step(
        gateway,
        namespace,
        pod,
        &format!("create product {}", product.sku),
        &create,
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_is_shell_free() {
        let argv = wp(&["option", "update", "home", "http://store-x.example.com"]);
        assert_eq!(argv[0], "wp");
        assert_eq!(argv.last().map(String::as_str), Some("--allow-root"));
        // Nothing that would need quoting survives into a single string
        assert!(argv.iter().all(|a| !a.contains("sh -c")));
    }

    #[test]
    fn sample_catalog_has_unique_skus() {
        let mut skus: Vec<_> = SAMPLE_PRODUCTS.iter().map(|p| p.sku).collect();
        skus.sort();
        skus.dedup();
        assert_eq!(skus.len(), SAMPLE_PRODUCTS.len());
    }
}
