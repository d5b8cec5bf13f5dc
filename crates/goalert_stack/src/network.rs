//! Network section: VPC, public/private subnets per AZ, internet and NAT
//! gateways.

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::NetworkConfig;
use crate::error::{StackError, StackResult};
use crate::template::intrinsic::{get_att, get_azs, reference, select};
use crate::template::{Resource, Template};

/// Smallest subnet AWS accepts.
const MIN_SUBNET_PREFIX: u8 = 28;

pub const VPC_ID: &str = "GoAlertVpc";
const IGW_ID: &str = "GoAlertVpcIgw";
const IGW_ATTACHMENT_ID: &str = "GoAlertVpcIgwAttachment";

/// Handle to the declared network.
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    pub vpc: String,
    pub cidr: Ipv4Network,
    pub public_subnets: Vec<Subnet>,
    pub private_subnets: Vec<Subnet>,
    /// Default routes of the public subnets; load balancers wait on these.
    pub public_routes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subnet {
    pub logical_id: String,
    pub cidr: Ipv4Network,
    pub az_index: usize,
}

impl Network {
    pub fn vpc_ref(&self) -> Value {
        reference(&self.vpc)
    }

    pub fn public_subnet_refs(&self) -> Vec<Value> {
        self.public_subnets.iter().map(|s| reference(&s.logical_id)).collect()
    }

    pub fn private_subnet_refs(&self) -> Vec<Value> {
        self.private_subnets.iter().map(|s| reference(&s.logical_id)).collect()
    }
}

/// Split `cidr` into `count` equally sized blocks, in address order.
pub fn carve_subnets(cidr: Ipv4Network, count: usize) -> StackResult<Vec<Ipv4Network>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let extra_bits = count.next_power_of_two().trailing_zeros() as u8;
    let prefix = cidr.prefix() + extra_bits;
    if prefix > MIN_SUBNET_PREFIX {
        return Err(StackError::InvalidNetwork(format!(
            "{} cannot hold {} subnets (would need /{})",
            cidr, count, prefix
        )));
    }

    let base = u32::from(cidr.network());
    let step = 1u32 << (32 - prefix);
    (0..count as u32)
        .map(|i| {
            Ipv4Network::new(Ipv4Addr::from(base + i * step), prefix)
                .map_err(|e| StackError::InvalidNetwork(e.to_string()))
        })
        .collect()
}

/// Declare the network and return its handle.
pub fn declare(template: &mut Template, config: &NetworkConfig) -> StackResult<Network> {
    let azs = usize::from(config.max_azs);
    let nat_count = usize::from(config.nat_gateways);
    if azs == 0 {
        return Err(StackError::InvalidNetwork("at least one AZ is required".to_string()));
    }
    if nat_count == 0 || nat_count > azs {
        return Err(StackError::InvalidNetwork(format!(
            "{} NAT gateways for {} AZs",
            nat_count, azs
        )));
    }

    let blocks = carve_subnets(config.cidr, azs * 2)?;
    debug!("Carved {} into {} subnet blocks", config.cidr, blocks.len());

    template.add_resource(
        VPC_ID,
        Resource::new("AWS::EC2::VPC")
            .property("CidrBlock", config.cidr.to_string())
            .property("EnableDnsHostnames", true)
            .property("EnableDnsSupport", true)
            .property("InstanceTenancy", "default")
            .property("Tags", name_tag("GoAlert-VPC")),
    )?;
    template.add_resource(
        IGW_ID,
        Resource::new("AWS::EC2::InternetGateway").property("Tags", name_tag("GoAlert-VPC")),
    )?;
    template.add_resource(
        IGW_ATTACHMENT_ID,
        Resource::new("AWS::EC2::VPCGatewayAttachment")
            .property("VpcId", reference(VPC_ID))
            .property("InternetGatewayId", reference(IGW_ID)),
    )?;

    let mut public_subnets = Vec::with_capacity(azs);
    let mut public_routes = Vec::with_capacity(azs);
    for (i, block) in blocks[..azs].iter().enumerate() {
        let subnet = declare_subnet(template, "Public", i, *block)?;
        let route_id = format!("{}DefaultRoute", subnet.logical_id);
        template.add_resource(
            &route_id,
            Resource::new("AWS::EC2::Route")
                .property("RouteTableId", reference(&route_table_id(&subnet)))
                .property("DestinationCidrBlock", "0.0.0.0/0")
                .property("GatewayId", reference(IGW_ID))
                .depends_on(IGW_ATTACHMENT_ID),
        )?;
        public_routes.push(route_id);
        public_subnets.push(subnet);
    }

    let mut nat_gateways = Vec::with_capacity(nat_count);
    for subnet in public_subnets.iter().take(nat_count) {
        let eip_id = format!("{}Eip", subnet.logical_id);
        let nat_id = format!("{}NatGateway", subnet.logical_id);
        template.add_resource(&eip_id, Resource::new("AWS::EC2::EIP").property("Domain", "vpc"))?;
        template.add_resource(
            &nat_id,
            Resource::new("AWS::EC2::NatGateway")
                .property("AllocationId", get_att(&eip_id, "AllocationId"))
                .property("SubnetId", reference(&subnet.logical_id))
                .depends_on(format!("{}DefaultRoute", subnet.logical_id)),
        )?;
        nat_gateways.push(nat_id);
    }

    let mut private_subnets = Vec::with_capacity(azs);
    for (i, block) in blocks[azs..].iter().enumerate() {
        let subnet = declare_subnet(template, "Private", i, *block)?;
        let nat_id = &nat_gateways[i % nat_gateways.len()];
        template.add_resource(
            format!("{}DefaultRoute", subnet.logical_id),
            Resource::new("AWS::EC2::Route")
                .property("RouteTableId", reference(&route_table_id(&subnet)))
                .property("DestinationCidrBlock", "0.0.0.0/0")
                .property("NatGatewayId", reference(nat_id)),
        )?;
        private_subnets.push(subnet);
    }

    Ok(Network {
        vpc: VPC_ID.to_string(),
        cidr: config.cidr,
        public_subnets,
        private_subnets,
        public_routes,
    })
}

fn declare_subnet(template: &mut Template, tier: &str, index: usize, block: Ipv4Network) -> StackResult<Subnet> {
    let subnet = Subnet {
        logical_id: format!("{}{}Subnet{}", VPC_ID, tier, index + 1),
        cidr: block,
        az_index: index,
    };
    let public = tier == "Public";

    template.add_resource(
        &subnet.logical_id,
        Resource::new("AWS::EC2::Subnet")
            .property("VpcId", reference(VPC_ID))
            .property("CidrBlock", block.to_string())
            .property("AvailabilityZone", select(index, get_azs()))
            .property("MapPublicIpOnLaunch", public)
            .property("Tags", name_tag(&format!("GoAlert-VPC/{}Subnet{}", tier, index + 1))),
    )?;
    template.add_resource(
        route_table_id(&subnet),
        Resource::new("AWS::EC2::RouteTable").property("VpcId", reference(VPC_ID)),
    )?;
    template.add_resource(
        format!("{}RouteTableAssociation", subnet.logical_id),
        Resource::new("AWS::EC2::SubnetRouteTableAssociation")
            .property("RouteTableId", reference(&route_table_id(&subnet)))
            .property("SubnetId", reference(&subnet.logical_id)),
    )?;
    Ok(subnet)
}

fn route_table_id(subnet: &Subnet) -> String {
    format!("{}RouteTable", subnet.logical_id)
}

fn name_tag(name: &str) -> Value {
    json!([{ "Key": "Name", "Value": name }])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    #[test]
    fn test_carve_four_blocks() {
        let blocks = carve_subnets(cidr("10.0.0.0/16"), 4).unwrap();
        let blocks: Vec<String> = blocks.iter().map(|b| b.to_string()).collect();
        assert_eq!(
            blocks,
            vec!["10.0.0.0/18", "10.0.64.0/18", "10.0.128.0/18", "10.0.192.0/18"]
        );
    }

    #[test]
    fn test_carve_rounds_up_to_power_of_two() {
        let blocks = carve_subnets(cidr("10.0.0.0/16"), 6).unwrap();
        assert_eq!(blocks.len(), 6);
        assert!(blocks.iter().all(|b| b.prefix() == 19));
        assert_eq!(blocks[5].to_string(), "10.0.160.0/19");
    }

    #[test]
    fn test_carve_too_small() {
        let err = carve_subnets(cidr("10.0.0.0/27"), 4).unwrap_err();
        assert!(matches!(err, StackError::InvalidNetwork(_)));
    }

    #[test]
    fn test_declare_default_layout() {
        let mut template = Template::new("test");
        let network = declare(&mut template, &NetworkConfig::default()).unwrap();

        assert_eq!(network.public_subnets.len(), 2);
        assert_eq!(network.private_subnets.len(), 2);
        assert_eq!(template.resources_of_type("AWS::EC2::NatGateway").count(), 1);
        assert_eq!(template.resources_of_type("AWS::EC2::Subnet").count(), 4);

        let vpc = template.resource(VPC_ID).unwrap();
        assert_eq!(vpc.properties["CidrBlock"], "10.0.0.0/16");
        assert_eq!(vpc.properties["EnableDnsSupport"], true);
        assert_eq!(vpc.properties["EnableDnsHostnames"], true);
    }

    #[test]
    fn test_private_routes_share_single_nat() {
        let mut template = Template::new("test");
        let network = declare(&mut template, &NetworkConfig::default()).unwrap();

        for subnet in &network.private_subnets {
            let route = template
                .resource(&format!("{}DefaultRoute", subnet.logical_id))
                .unwrap();
            assert_eq!(
                route.get("NatGatewayId").unwrap(),
                &reference("GoAlertVpcPublicSubnet1NatGateway")
            );
        }
    }

    #[test]
    fn test_rejects_more_nats_than_azs() {
        let mut template = Template::new("test");
        let config = NetworkConfig {
            nat_gateways: 3,
            ..NetworkConfig::default()
        };
        assert!(declare(&mut template, &config).is_err());
    }
}
